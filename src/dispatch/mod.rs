//! Generic RPC-over-REST dispatch: which operations are exposed, which
//! middleware they need, and how one request runs through them.

pub mod bolt;
pub mod capability;
pub mod context;
pub mod error;
pub mod handler;
pub mod repository;
pub mod traits;

pub use bolt::{Bolt, BoltOutcome, Completion};
pub use capability::{Capability, CapabilityRegistry, MIDDLEWARE_PREFIX};
pub use context::RequestContext;
pub use error::{ChainError, ResolveError};
pub use handler::{settle, success_reply, Dispatcher};
pub use repository::{MiddlewareBuilder, MiddlewareEntry, MiddlewareRepository};
pub use traits::{Contributions, Flow, Link, Middleware, MiddlewareBox, Step};
