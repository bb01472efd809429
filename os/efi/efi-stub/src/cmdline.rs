//! Command line handling: UCS-2 load options to ASCII, and the
//! `name=value` options the stub itself interprets.

use alloc::string::String;

/// Convert firmware load options to an ASCII command line.
///
/// Conversion stops at the first NUL; characters outside ASCII become `?`.
#[must_use]
pub fn to_ascii(options: &[u16]) -> String {
    options
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| match u8::try_from(c) {
            Ok(b) if b.is_ascii() => char::from(b),
            _ => '?',
        })
        .collect()
}

/// Every value of options starting with `prefix`, e.g. all paths of
/// `initrd=\a.img initrd=\b.img`.
pub fn option_values<'a>(cmdline: &'a str, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    cmdline
        .split_ascii_whitespace()
        .filter_map(move |word| word.strip_prefix(prefix))
        .filter(|value| !value.is_empty())
}

/// Firmware file paths use backslashes.
#[must_use]
pub fn to_firmware_path(path: &str) -> String {
    path.chars().map(|c| if c == '/' { '\\' } else { c }).collect()
}
