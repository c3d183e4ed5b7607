//! Page abstractions (§4.2).
//!
//! Two aligned views share the same fixed-size byte buffer abstraction but
//! differ in element layout, mirroring
//! `examples/original_source/lstore/page.py`'s `AlignedPage` / `DataPage` /
//! `SchemaEncodingPage` split. Pages are pure byte buffers on disk; the
//! record count for capacity checks lives in the page directory, not in a
//! page header (§4.2).

mod data_page;
mod page_id;
mod schema_page;

pub use data_page::DataPage;
pub use page_id::{columns_of, page_range, PageId, PageLocation};
pub use schema_page::SchemaEncodingPage;
