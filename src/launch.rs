use std::path::PathBuf;

pub const USAGE: &str = "\
Usage: tagscope <dicom_file_or_folder>

Browse and edit the tags of a DICOM file, or of every slice in a folder.

Options:
  -h, --help    Print this help

Environment:
  RUST_LOG                 Log filter (default: info)
  TAGSCOPE_LOAD_WORKERS    Number of parser threads";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchRequest {
    Open(PathBuf),
    Help,
}

pub fn parse_launch_request_from_args(args: &[String]) -> Result<LaunchRequest, String> {
    let mut path = None;
    let mut options_done = false;

    for arg in args {
        if !options_done {
            match arg.as_str() {
                "-h" | "--help" => return Ok(LaunchRequest::Help),
                "--" => {
                    options_done = true;
                    continue;
                }
                flag if flag.starts_with('-') && flag.len() > 1 => {
                    return Err(format!("Unknown option {flag}"));
                }
                _ => {}
            }
        }

        if path.is_some() {
            return Err("Expected exactly one file or folder.".to_string());
        }
        path = Some(parse_path_argument(arg)?);
    }

    path.map(LaunchRequest::Open)
        .ok_or_else(|| "Missing file or folder argument.".to_string())
}

/// Plain paths pass through. `file://` URIs from desktop launchers are decoded.
fn parse_path_argument(raw: &str) -> Result<PathBuf, String> {
    let Some(rest) = strip_file_scheme(raw) else {
        return Ok(PathBuf::from(raw));
    };

    // file://localhost/path and file:///path both name a local path.
    let location = rest.strip_prefix("localhost").unwrap_or(rest);
    let location = strip_query_and_fragment(location);
    let decoded = percent_decode(location)?;
    if decoded.trim().is_empty() {
        return Err("file:// URI does not name a path.".to_string());
    }
    Ok(PathBuf::from(decoded))
}

fn strip_file_scheme(uri: &str) -> Option<&str> {
    let prefix = "file://";
    if uri.len() >= prefix.len() && uri[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&uri[prefix.len()..])
    } else {
        None
    }
}

fn strip_query_and_fragment(value: &str) -> &str {
    let query_index = value.find('?').unwrap_or(value.len());
    let fragment_index = value.find('#').unwrap_or(value.len());
    &value[..query_index.min(fragment_index)]
}

fn percent_decode(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let hi = bytes.get(index + 1).copied().and_then(decode_hex_digit);
            let lo = bytes.get(index + 2).copied().and_then(decode_hex_digit);
            let (Some(hi), Some(lo)) = (hi, lo) else {
                return Err("Invalid percent-encoding in file URI.".to_string());
            };
            decoded.push((hi << 4) | lo);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }

    String::from_utf8(decoded)
        .map_err(|_| "File URI contains invalid UTF-8 after decoding.".to_string())
}

fn decode_hex_digit(value: u8) -> Option<u8> {
    match value {
        b'0'..=b'9' => Some(value - b'0'),
        b'a'..=b'f' => Some(value - b'a' + 10),
        b'A'..=b'F' => Some(value - b'A' + 10),
        _ => None,
    }
}
