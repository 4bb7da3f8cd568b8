pub mod routes;
pub mod runtime;
pub mod session;

pub use routes::{create_share_router, ShareState, ARCHIVE_FILENAME};
pub use runtime::{bind_with_retries, start_share, ShareOptions, ShareOutcome, CONFIRM_TIMEOUT};
pub use session::{ConfirmAck, Phase, TransferSession};
