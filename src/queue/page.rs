//! Pagination over ledger entries. Pages are 1-based.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    total: usize,
    page_size: usize,
}

impl Pagination {
    /// A page size of zero is treated as one.
    pub fn new(total: usize, page_size: usize) -> Self {
        Self {
            total,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size)
    }

    pub fn is_valid(&self, page: usize) -> bool {
        page >= 1 && page <= self.total_pages()
    }

    pub fn next_page(&self, page: usize) -> Option<usize> {
        (page < self.total_pages()).then_some(page + 1)
    }

    /// The items on `page`. Callers check [`Pagination::is_valid`] first.
    pub fn slice<T>(&self, items: Vec<T>, page: usize) -> Vec<T> {
        let skip = page.saturating_sub(1) * self.page_size;
        items.into_iter().skip(skip).take(self.page_size).collect()
    }
}
