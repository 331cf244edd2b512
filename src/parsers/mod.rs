//! # 解析器模块
//!
//! - `table` - 电子表格导出文本（CSV 风格）解析
//! - `html` - HTML文档解析、DOM操作、元数据处理

pub mod html;
pub mod table;

pub use html::{html_to_dom, serialize_document};
pub use table::{parse_table, parse_table_with, RawTable};
