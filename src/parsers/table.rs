//! 表格文本解析
//!
//! 将电子表格导出的分隔文本（CSV 风格）解析为行/单元格数组。
//! 解析过程从不失败：格式错误的输入会尽力解析为若干行。

/// 行序列，每行是单元格字符串序列
pub type RawTable = Vec<Vec<String>>;

/// 默认字段分隔符
pub const DEFAULT_DELIMITER: char = ',';

/// 默认引号字符
pub const DEFAULT_QUOTE: char = '"';

/// 使用默认分隔符和引号解析表格文本
pub fn parse_table(input: &str) -> RawTable {
    parse_table_with(input, DEFAULT_DELIMITER, DEFAULT_QUOTE)
}

/// 使用指定分隔符和引号解析表格文本
///
/// - 引号内的分隔符和换行符按字面处理
/// - 引号内连续两个引号表示一个字面引号
/// - 所有 `\r` 字符被丢弃
/// - 引号外的换行结束当前行
/// - 最后一个换行之后的内容作为最后一行（可能不完整）
/// - 末尾所有单元格均为空白的行被移除
pub fn parse_table_with(input: &str, delimiter: char, quote: char) -> RawTable {
    let mut rows: RawTable = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // 自上一个行分隔符以来是否消费了任何内容
    let mut pending = false;

    let mut chars = input.chars().filter(|&c| c != '\r').peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == quote {
                if chars.peek() == Some(&quote) {
                    field.push(quote);
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        if c == quote {
            in_quotes = true;
            pending = true;
        } else if c == delimiter {
            row.push(std::mem::take(&mut field));
            pending = true;
        } else if c == '\n' {
            row.push(std::mem::take(&mut field));
            rows.push(std::mem::take(&mut row));
            pending = false;
        } else {
            field.push(c);
            pending = true;
        }
    }

    if pending {
        row.push(field);
        rows.push(row);
    }

    while rows
        .last()
        .is_some_and(|last| last.iter().all(|cell| cell.trim().is_empty()))
    {
        rows.pop();
    }

    rows
}
