//! Per-message injection and the stage views built from it.
//!
//! An [`Injection`] is created for every inbound message. It carries the
//! static context (subject, reply address, bus access, subject-scoped log),
//! the shared [`Services`], and a typed [`Extensions`] map middleware can use
//! to hand data to later stages.
//!
//! Stages never see the injection directly. Each one receives a context
//! exposing only what that stage may do:
//!
//! | Context | Stage | Injection access |
//! |---------|-------|------------------|
//! | [`BeforeContext`] | `before_*` hooks | mutable |
//! | [`AfterContext`] | `after_*` hooks | mutable, plus the request the stage saw |
//! | [`ValidationContext`] | validate | read-only |
//! | [`AuthorizationContext`] | authorize | read-only |
//! | [`HandleContext`] | handle | read-only |

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bus::BusClient;
use crate::envelope::{Request, Response};
use crate::log::LogService;
use crate::services::Services;
use crate::stage::{Outcome, Rejection, StageResult};

/// Typed per-message storage.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok().map(|b| *b))
    }

    /// Borrows a stored value.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }

    /// Mutably borrows a stored value.
    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    /// Removes and returns a stored value.
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok().map(|b| *b))
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.len()).finish()
    }
}

/// Everything a message's stages share.
#[derive(Debug)]
pub struct Injection {
    subject: String,
    reply: Option<String>,
    bus: BusClient,
    services: Arc<Services>,
    extensions: Extensions,
    log: LogService,
}

impl Injection {
    /// Creates the injection for a message on `subject`.
    ///
    /// `log` is scoped with `[subject]`.
    pub fn new(
        subject: impl Into<String>,
        bus: BusClient,
        services: Arc<Services>,
        log: &LogService,
    ) -> Self {
        let subject = subject.into();
        let log = log.scope(&subject);
        Self {
            subject,
            reply: None,
            bus,
            services,
            extensions: Extensions::new(),
            log,
        }
    }

    /// Sets the reply address.
    #[must_use]
    pub fn with_reply(mut self, reply: Option<String>) -> Self {
        self.reply = reply;
        self
    }

    /// Subject the message arrived on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Reply address, if the sender expects one.
    pub fn reply(&self) -> Option<&str> {
        self.reply.as_deref()
    }

    /// Bus access for calling other services.
    pub fn bus(&self) -> &BusClient {
        &self.bus
    }

    /// Shared services.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Subject-scoped log.
    pub fn log(&self) -> &LogService {
        &self.log
    }

    /// Per-message extensions.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable per-message extensions.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

macro_rules! shared_accessors {
    () => {
        /// Subject the message arrived on.
        pub fn subject(&self) -> &str {
            self.injection.subject()
        }

        /// Reply address, if the sender expects one.
        pub fn reply(&self) -> Option<&str> {
            self.injection.reply()
        }

        /// Bus access for calling other services.
        pub fn bus(&self) -> &BusClient {
            self.injection.bus()
        }

        /// Shared services.
        pub fn services(&self) -> &Services {
            self.injection.services()
        }

        /// Looks up a shared service by type.
        pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
            self.injection.services().get::<T>()
        }

        /// Borrows a per-message extension.
        pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
            self.injection.extensions().get::<T>()
        }

        /// Stage-scoped log.
        pub fn log(&self) -> &LogService {
            &self.log
        }

        /// Builds a rejection result.
        pub fn error<T>(&self, code: u16, errors: impl Into<Value>) -> StageResult<T> {
            Err(Rejection::new(code, errors).into())
        }
    };
}

macro_rules! mutable_accessors {
    () => {
        /// Mutable per-message extensions.
        pub fn extensions_mut(&mut self) -> &mut Extensions {
            self.injection.extensions_mut()
        }

        /// Stores a per-message extension for later stages.
        pub fn insert_extension<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
            self.injection.extensions_mut().insert(value)
        }

        /// Removes a per-message extension.
        pub fn take_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
            self.injection.extensions_mut().remove::<T>()
        }
    };
}

/// Context for `before_*` middleware hooks.
pub struct BeforeContext<'a> {
    injection: &'a mut Injection,
    log: LogService,
}

impl<'a> BeforeContext<'a> {
    /// Creates the context.
    pub fn new(injection: &'a mut Injection, log: LogService) -> Self {
        Self { injection, log }
    }

    shared_accessors!();
    mutable_accessors!();

    /// Passes `request` on to the next stage.
    pub fn ok(&self, request: Request) -> StageResult<Request> {
        Ok(request)
    }
}

/// Context for `after_*` middleware hooks.
pub struct AfterContext<'a> {
    injection: &'a mut Injection,
    request: &'a Request,
    log: LogService,
}

impl<'a> AfterContext<'a> {
    /// Creates the context. `request` is the request the unwound stage saw.
    pub fn new(injection: &'a mut Injection, request: &'a Request, log: LogService) -> Self {
        Self {
            injection,
            request,
            log,
        }
    }

    shared_accessors!();
    mutable_accessors!();

    /// Request as seen by the stage being unwound.
    pub fn request(&self) -> &Request {
        self.request
    }

    /// Passes `response` on to the next hook.
    pub fn ok(&self, response: Response) -> StageResult<Response> {
        Ok(response)
    }
}

macro_rules! stage_context {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<'a> {
            injection: &'a Injection,
            log: LogService,
        }

        impl<'a> $name<'a> {
            /// Creates the context.
            pub fn new(injection: &'a Injection, log: LogService) -> Self {
                Self { injection, log }
            }

            shared_accessors!();

            /// Succeeds without changing anything.
            pub fn ok(&self) -> StageResult<Outcome> {
                Ok(Outcome::ok())
            }

            /// Succeeds with `body`.
            pub fn ok_with(&self, body: impl Into<Value>) -> StageResult<Outcome> {
                Ok(Outcome::body(body))
            }
        }
    };
}

stage_context!(
    /// Context for the validate stage.
    ValidationContext
);
stage_context!(
    /// Context for the authorize stage.
    AuthorizationContext
);
stage_context!(
    /// Context for the handle stage.
    HandleContext
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemorySink;
    use crate::memory::MemoryBus;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct StartTime(u64);

    fn injection(sink: Arc<MemorySink>) -> Injection {
        let mut services = Services::new();
        services.insert(Arc::new(String::from("db")));
        Injection::new(
            "orders.create",
            BusClient::new(Arc::new(MemoryBus::new())),
            Arc::new(services),
            &LogService::new(sink),
        )
        .with_reply(Some("_INBOX.1".into()))
    }

    #[test]
    fn test_extensions_typed_storage() {
        let mut ext = Extensions::new();
        assert!(ext.insert(StartTime(1)).is_none());
        assert_eq!(ext.insert(StartTime(2)), Some(StartTime(1)));
        ext.get_mut::<StartTime>().unwrap().0 += 1;
        assert_eq!(ext.get::<StartTime>(), Some(&StartTime(3)));
        assert_eq!(ext.remove::<StartTime>(), Some(StartTime(3)));
        assert!(!ext.contains::<StartTime>());
    }

    #[test]
    fn test_injection_scopes_log_with_subject() {
        let sink = Arc::new(MemorySink::new());
        let inj = injection(sink.clone());
        inj.log().info("Begin");
        assert_eq!(sink.texts(), vec!["[orders.create]Begin".to_string()]);
        assert_eq!(inj.reply(), Some("_INBOX.1"));
    }

    #[test]
    fn test_before_context_writes_extensions_visible_to_handle() {
        let sink = Arc::new(MemorySink::new());
        let mut inj = injection(sink);
        let log = inj.log().scope("timing").scope("before");
        {
            let mut ctx = BeforeContext::new(&mut inj, log);
            ctx.insert_extension(StartTime(10));
            assert_eq!(ctx.subject(), "orders.create");
            assert_eq!(*ctx.service::<String>().unwrap(), "db");
        }
        let ctx = HandleContext::new(&inj, inj.log().scope("handle"));
        assert_eq!(ctx.extension::<StartTime>(), Some(&StartTime(10)));
        assert_eq!(ctx.log().prefix(), "[orders.create][handle]");
    }

    #[test]
    fn test_stage_context_result_builders() {
        let sink = Arc::new(MemorySink::new());
        let inj = injection(sink);
        let ctx = ValidationContext::new(&inj, inj.log().scope("validate"));
        assert_eq!(ctx.ok_with("x").unwrap().body, Some(json!("x")));
        let err = ctx.error::<Outcome>(400, json!({"field": "id"})).unwrap_err();
        assert_eq!(err.code(), 400);
    }
}
