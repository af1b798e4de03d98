mod snapshot;
mod state;
mod status;
mod timing;
mod view;

pub use snapshot::SessionSnapshot;
pub use state::SessionState;
pub use status::{Change, IgnoreReason, SessionStatus, Transition};
pub use timing::{SessionConfig, SessionConfigError, TimingMode, TimingSelection};
pub use view::{OptionView, QuestionView, ReviewItem, SessionProgress};
