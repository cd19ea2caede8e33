mod types;
mod utils;

pub use types::ServiceAccountKey;
pub use utils::assemble;
pub use utils::assemble_from_env;
pub use utils::normalize_private_key;
