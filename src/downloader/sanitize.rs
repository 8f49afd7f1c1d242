const RESERVED_FILENAME_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

pub(crate) fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if RESERVED_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

pub(crate) fn sanitize_directory(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '-'))
        .collect()
}
