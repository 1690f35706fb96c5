pub use deltaship_types::error::{DeltashipError, Result};
