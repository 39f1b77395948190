pub mod engine;
pub mod routing;
pub mod states;

pub use engine::{EscalationEngine, EscalationTransitionError};
pub use routing::{resolve_route, HandoffRoute, RouteSource};
pub use states::{EscalationAction, EscalationContext, EscalationEvent, TransitionOutcome};
