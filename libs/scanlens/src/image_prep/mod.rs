mod utils;

pub use utils::prepare_image;
pub use utils::PreparedImage;
pub use utils::MAX_DIMENSION;
pub use utils::MAX_RAW_BYTES;
