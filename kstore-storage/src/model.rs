use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct List<T> {
    pub data: Vec<T>,
    pub total: i64,
}

// rows need not implement Default
impl<T> Default for List<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            total: 0,
        }
    }
}
