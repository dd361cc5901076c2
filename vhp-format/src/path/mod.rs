//! Virtual paths inside a container.
//!
//! A virtual path is a `/`-delimited sequence of literal entry names. Empty segments
//! are skipped, so `/a//b` and `a/b` name the same entry. There is no support for `.`
//! or `..`: those are not valid names, so a path containing them never resolves.

mod error;

pub use self::error::IntoNameError;

/// The separator used between entry names in a virtual path.
pub const PATH_SEP: char = '/';

/// Iterate over the non-empty segments of a virtual path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEP).filter(|x| !x.is_empty())
}

/// Split a virtual path into its parent segments and final name.
///
/// Returns `None` when the path has no segments at all.
pub fn split_last(path: &str) -> Option<(Vec<&str>, &str)> {
    let mut parts: Vec<_> = segments(path).collect();
    let name = parts.pop()?;
    Some((parts, name))
}

/// Join a parent virtual path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, PATH_SEP, name)
    }
}

/// Check that `name` can be stored as a single entry name.
///
/// Names are matched byte-for-byte during resolution, so no normalisation happens here.
pub fn validate_name(name: &str) -> Result<(), IntoNameError> {
    use unic_ucd::GeneralCategory;

    if name.is_empty() {
        return Err(IntoNameError::EmptyName);
    }

    if name == "." || name == ".." {
        return Err(IntoNameError::Reserved);
    }

    let unrepresentable = name.chars().any(|c| {
        let cat = GeneralCategory::of(c);
        c == PATH_SEP || c == '\\' || cat == GeneralCategory::Control || (cat.is_separator() && c != ' ')
    });

    if unrepresentable {
        return Err(IntoNameError::UnrepresentableStr);
    }

    Ok(())
}
