//! Month-sharded tick storage: layout, codecs, writer, reader and finders.

pub mod codec;
pub mod cursor;
pub mod finder;
pub mod layout;
pub mod month;
pub mod store;

pub use codec::BINARY_RECORD_SIZE;
pub use cursor::{TickStreamCursor, DEFAULT_BUFFER_SIZE};
pub use finder::{FirstRecordFinder, LastRecordFinder, EARLIEST_YEAR};
pub use layout::{ShardEncoding, ShardLayout, TickFormat};
pub use month::ShardMonth;
pub use store::{FlushReport, TickShardStore, DEFAULT_FLUSH_INTERVAL};
