use crate::error::{NsError, NsResult};

/// Split an absolute path into its components. The root yields no components.
///
/// One trailing `/` is tolerated. Empty, `.`, `..` and NUL-containing components are rejected
/// rather than normalized; a component longer than `max_name_len` is an [`NsError::InvalidName`].
pub fn parse_path(path: &str, max_name_len: usize) -> NsResult<Vec<&str>> {
    let invalid = || NsError::PathIsInvalid {
        path: path.to_owned(),
    };

    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let rest = rest.strip_suffix('/').unwrap_or(rest);

    rest.split('/')
        .map(|name| {
            if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
                return Err(invalid());
            }
            if name.len() > max_name_len {
                return Err(NsError::InvalidName {
                    name: name.to_owned(),
                    max_len: max_name_len,
                });
            }
            Ok(name)
        })
        .collect()
}

/// Render the first `depth` components back into a path, for error messages.
pub(crate) fn prefix(components: &[&str], depth: usize) -> String {
    let mut out = String::new();
    for name in &components[..depth] {
        out.push('/');
        out.push_str(name);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
