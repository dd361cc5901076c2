use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntoNameError {
    UnrepresentableStr,
    Reserved,
    EmptyName,
}

impl std::error::Error for IntoNameError {}

impl fmt::Display for IntoNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl IntoNameError {
    pub fn as_str(&self) -> &str {
        match self {
            IntoNameError::UnrepresentableStr => "unrepresentable string found in name",
            IntoNameError::Reserved => "`.` and `..` cannot be used as names",
            IntoNameError::EmptyName => "no name provided",
        }
    }
}
