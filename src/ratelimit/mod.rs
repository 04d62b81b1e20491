//! Rate limiting logic and state management.

mod clock;
mod counter;
mod keys;
mod limiter;
mod policy;
mod rules;
pub(crate) mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{window_state, CounterRecord, WindowState};
pub use keys::{KeyGenerator, KeyStrategy, ScopedKey};
pub use limiter::{RateLimitEngine, DEFAULT_STORE_TIMEOUT};
pub use policy::{FailurePolicy, LimitSpec, LimiterPolicy, SkipRule, HEALTH_CHECK_PATHS, MAX_WINDOW};
pub use rules::{RateLimitConfig, RouteRule, RouteTable, RoutingConfig, ScopeConfig};
pub use store::{CounterStore, IncrementOutcome, MemoryStore, RetryingStore, StoreError, StoreResult};
