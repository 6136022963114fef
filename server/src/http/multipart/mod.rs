// streaming multipart/form-data file receiver
//
// modeled on the boost.beast downloader this server replaced: a bounded
// working buffer is scanned for the boundary token as bytes arrive off the
// wire, so an upload of any size is handled in chunk_cap-sized increments
// rather than being buffered into memory whole
pub mod dest;
pub mod error;
pub mod receiver;
pub mod scan;

pub use error::{DownloadFault, ReceiverError};
pub use receiver::{DownloadSettings, MultipartReceiver};
