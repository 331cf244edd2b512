//! 映射构建器
//!
//! 从解析后的表格推导替换映射。三种策略按固定顺序执行，后执行的策略可覆盖
//! 先前写入的同名键：
//!
//! 1. **索引明文收集**：`(明文, 数字索引)` 行写入辅助索引表，仅供策略 2 回退使用
//! 2. **打包行展开**：第 0 行的两个单元格各含 ≥100 个空白分隔的记号时按位置配对
//! 3. **逐行直接替换**：每行 `cell0 → cell1`，始终最后执行，因此总是胜出

use std::collections::HashMap;

use crate::parsers::table::RawTable;

use super::Mapping;

/// 判定为打包行所需的最少记号数
pub const PACKED_TOKEN_THRESHOLD: usize = 100;

/// 启用取模回退所需的最少索引明文条目数
pub const INDEXED_FALLBACK_MIN: usize = 10;

/// 构建过程统计，用于日志
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// 第 0 行是否被识别为打包行
    pub packed: bool,
    /// 索引明文表中的条目数
    pub indexed_entries: usize,
    /// 打包行按位置配对写入的条目数
    pub packed_pairs: usize,
    /// 取模回退写入的条目数
    pub modulo_fallback: usize,
    /// 逐行直接替换写入的条目数
    pub direct_rows: usize,
}

/// 索引 → 明文辅助表
#[derive(Debug, Default)]
struct IndexedPlaintext {
    entries: HashMap<usize, String>,
    max_index: Option<usize>,
}

impl IndexedPlaintext {
    fn collect(table: &RawTable) -> Self {
        let mut indexed = IndexedPlaintext::default();

        for row in table.iter().filter(|row| row.len() >= 2) {
            let plaintext = row[0].trim();
            let index = row[1].trim();
            if plaintext.is_empty() || !is_decimal(index) {
                continue;
            }
            // 超出 usize 的索引无法寻址，直接忽略
            let Ok(index) = index.parse::<usize>() else {
                continue;
            };
            indexed.entries.insert(index, plaintext.to_string());
            indexed.max_index = Some(indexed.max_index.map_or(index, |max| max.max(index)));
        }

        indexed
    }

    /// 表的跨度（最大索引 + 1），稀疏索引留下的空位也计入
    fn size(&self) -> usize {
        self.max_index.map_or(0, |max| max.saturating_add(1))
    }
}

/// 从表格构建映射
pub fn build_mapping(table: &RawTable) -> (Mapping, BuildReport) {
    let mut mapping = Mapping::new();
    let mut report = BuildReport::default();

    // 策略 1
    let indexed = IndexedPlaintext::collect(table);
    report.indexed_entries = indexed.entries.len();

    // 策略 2
    if let Some(first) = table.first().filter(|row| row.len() >= 2) {
        let sources = split_packed(&first[0]);
        if sources.len() >= PACKED_TOKEN_THRESHOLD {
            report.packed = true;
            let targets = split_packed(&first[1]);

            if targets.len() >= PACKED_TOKEN_THRESHOLD {
                for (source, target) in sources.iter().zip(targets.iter()) {
                    if mapping.insert(source, target) {
                        report.packed_pairs += 1;
                    }
                }
            } else if indexed.entries.len() >= INDEXED_FALLBACK_MIN && indexed.size() > 0 {
                // 旧版表格格式的兼容路径，正常情况下应使用上面的直接配对
                let size = indexed.size();
                for (i, source) in sources.iter().enumerate() {
                    if let Some(plaintext) = indexed.entries.get(&(i % size)) {
                        if mapping.insert(source, plaintext) {
                            report.modulo_fallback += 1;
                        }
                    }
                }
            }
        }
    }

    // 策略 3
    let skip = usize::from(report.packed);
    for row in table.iter().skip(skip).filter(|row| row.len() >= 2) {
        if mapping.insert(&row[0], &row[1]) {
            report.direct_rows += 1;
        }
    }

    tracing::debug!(
        packed = report.packed,
        indexed = report.indexed_entries,
        packed_pairs = report.packed_pairs,
        modulo_fallback = report.modulo_fallback,
        direct_rows = report.direct_rows,
        "映射构建完成: {} 个条目",
        mapping.len()
    );

    (mapping, report)
}

/// 按空白（含全角空格）切分打包单元格
pub fn split_packed(cell: &str) -> Vec<&str> {
    cell.split(char::is_whitespace)
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}
