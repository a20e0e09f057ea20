//! Device session: shared state, events, link supervision, self-test and
//! the orchestrator that ties the tasks together

pub mod diagnostics;
pub mod events;
pub mod link;
pub mod orchestrator;
pub mod state;

pub use diagnostics::{run_self_test, CheckResult, CheckStatus, SelfTestReport};
pub use events::{EventReceiver, EventSender, SessionEvent};
pub use link::{LinkEvent, LinkMonitor};
pub use orchestrator::{Orchestrator, Session, SessionExit};
pub use state::{RunFlag, SharedState};
