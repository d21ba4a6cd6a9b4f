//! Symbol name sanitizing.
//!
//! Internalized definitions get names that every assembler accepts.
//! Identifier bytes and bytes `0x80..=0xFE` are kept; punctuation is
//! spelled out with a short mnemonic and any other byte is written as two
//! uppercase hex digits. Each replacement is followed by `.`.

/// Mnemonic for a punctuation byte, if it has one.
fn mnemonic(byte: u8) -> Option<&'static str> {
    Some(match byte {
        b' ' => "SP",
        b'!' => "NOT",
        b'"' => "DQT",
        b'#' => "YY",
        b'%' => "REM",
        b'&' => "AND",
        b'\'' => "SQT",
        b'(' => "LPR",
        b')' => "RPR",
        b'*' => "MUL",
        b'+' => "SUM",
        b'-' => "SUB",
        b'.' => "DOT",
        b'/' => "DIV",
        b':' => "COL",
        b'<' => "LT",
        b'=' => "EQ",
        b'>' => "GT",
        b'?' => "QQ",
        b'@' => "AT",
        b'[' => "LBR",
        b'\\' => "RDV",
        b']' => "RBR",
        b'^' => "POW",
        b'`' => "TIC",
        b'{' => "LCR",
        b'|' => "OR",
        b'}' => "RCR",
        b'~' => "TLD",
        0x7f => "DEL",
        _ => return None,
    })
}

fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || (0x80..0xff).contains(&byte)
}

/// Rewrite `name` so it only contains assembler-safe characters.
///
/// ```
/// use ori_image::make_safe_name;
///
/// assert_eq!(make_safe_name("llvm.a≠a$a!a##"), "llvmDOT.a≠a$aNOT.aYY.YY.");
/// ```
pub fn make_safe_name(name: &str) -> String {
    let bytes = name.as_bytes();
    if bytes.iter().copied().all(is_safe) {
        return name.to_owned();
    }
    let mut out = Vec::with_capacity(bytes.len() + 8);
    for &byte in bytes {
        if is_safe(byte) {
            out.push(byte);
            continue;
        }
        match mnemonic(byte) {
            Some(m) => out.extend_from_slice(m.as_bytes()),
            None => out.extend_from_slice(format!("{byte:02X}").as_bytes()),
        }
        out.push(b'.');
    }
    // Multi-byte sequences are copied whole (their bytes are all >= 0x80
    // and never 0xFF), so the output stays valid UTF-8.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
