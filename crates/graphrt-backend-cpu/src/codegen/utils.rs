use graphrt::DType;

pub(super) fn c_type(dtype: DType) -> &'static str {
    match dtype {
        DType::Boolean | DType::U8 => "uint8_t",
        DType::F32 => "float",
        DType::F64 => "double",
        DType::I8 => "int8_t",
        DType::I16 => "int16_t",
        DType::I32 => "int32_t",
        DType::I64 => "int64_t",
        DType::U16 => "uint16_t",
        DType::U32 => "uint32_t",
        DType::U64 => "uint64_t",
    }
}

pub(super) fn escape_c_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

/// Comma separated hex bytes, wrapped every 16 values. Empty input yields `0`.
pub(super) fn byte_initializer(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }
    bytes
        .chunks(16)
        .map(|chunk| {
            chunk
                .iter()
                .map(|byte| format!("0x{byte:02x}"))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect::<Vec<_>>()
        .join(",\n  ")
}

pub(super) fn push_line(module: &mut String, indent: usize, line: &str) {
    push_block(module, indent, line);
}

/// Appends `block` re-indented to `indent` levels, dropping the common
/// leading whitespace and a leading or trailing blank line.
pub(super) fn push_block(module: &mut String, indent: usize, block: &str) {
    if block.is_empty() {
        return;
    }
    let pad = "  ".repeat(indent);
    let mut lines: Vec<&str> = block.split('\n').collect();
    if matches!(lines.first(), Some(line) if line.trim().is_empty()) {
        lines.remove(0);
    }
    if matches!(lines.last(), Some(line) if line.trim().is_empty()) {
        lines.pop();
    }

    let min_indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.chars().take_while(|c| *c == ' ' || *c == '\t').count())
        .min()
        .unwrap_or(0);

    for line in lines {
        let trimmed = line.get(min_indent..).unwrap_or("").trim_end();
        if trimmed.is_empty() {
            module.push('\n');
            continue;
        }
        module.push_str(&pad);
        module.push_str(trimmed);
        module.push('\n');
    }
}

/// Emits `for (size_t {index} = 0; {index} < {count}; ++{index}) { body }`.
pub(super) fn emit_flat_loop(module: &mut String, indent: usize, index: &str, count: usize, body: &str) {
    push_line(
        module,
        indent,
        &format!("for (size_t {index} = 0; {index} < {count}; ++{index}) {{"),
    );
    push_line(module, indent + 1, body);
    push_line(module, indent, "}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_block_strips_common_indent() {
        let mut out = String::new();
        push_block(
            &mut out,
            1,
            r#"
                if (x) {
                  y();
                }
            "#,
        );
        assert_eq!(out, "  if (x) {\n    y();\n  }\n");
    }

    #[test]
    fn byte_initializer_wraps_rows() {
        let bytes: Vec<u8> = (0..18).collect();
        let text = byte_initializer(&bytes);
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("0x00, 0x01"));
        assert_eq!(byte_initializer(&[]), "0");
    }

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_c_string(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
