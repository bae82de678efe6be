/// Page arithmetic shared by the search and follows views.
///
/// Pages are 1-based throughout; an empty result set still has one page so
/// the pagination bar never disappears into a zero state.

pub const DEFAULT_PER_PAGE: usize = 24;
pub const DEFAULT_WINDOW: usize = 5;

pub fn page_count(total: usize, per_page: usize) -> usize {
    if per_page == 0 {
        return 1;
    }
    total.div_ceil(per_page).max(1)
}

/// Clamp a requested page into `[1, pages]`. Never returns zero.
pub fn clamp_page(page: usize, pages: usize) -> usize {
    page.clamp(1, pages.max(1))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow {
    pub current: usize,
    pub pages: usize,
    /// Inclusive range of page buttons to draw.
    pub start: usize,
    pub end: usize,
    pub prev_enabled: bool,
    pub next_enabled: bool,
}

/// Fixed-size window of page buttons centered on `page`, clamped at both
/// ends, with previous/next controls that disable at the boundaries.
pub fn window(page: usize, pages: usize, size: usize) -> PageWindow {
    let pages = pages.max(1);
    let page = clamp_page(page, pages);
    let size = size.max(1);
    let start = page.saturating_sub(size / 2).max(1);
    let end = (start + size - 1).min(pages);
    PageWindow {
        current: page,
        pages,
        start,
        end,
        prev_enabled: page > 1,
        next_enabled: page < pages,
    }
}

/// Byte-range of `items` visible on `page`.
pub fn slice_bounds(total: usize, page: usize, per_page: usize) -> (usize, usize) {
    let pages = page_count(total, per_page);
    let page = clamp_page(page, pages);
    let start = (page - 1) * per_page;
    let end = (start + per_page).min(total);
    (start.min(total), end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_is_one_page() {
        assert_eq!(page_count(0, 24), 1);
    }

    #[test]
    fn partial_last_page_rounds_up() {
        assert_eq!(page_count(25, 24), 2);
        assert_eq!(page_count(48, 24), 2);
        assert_eq!(page_count(49, 24), 3);
    }

    #[test]
    fn clamp_never_returns_zero() {
        assert_eq!(clamp_page(5, 2), 2);
        assert_eq!(clamp_page(0, 2), 1);
        assert_eq!(clamp_page(1, 0), 1);
    }

    #[test]
    fn window_centers_on_current() {
        let w = window(5, 10, 5);
        assert_eq!((w.start, w.end), (3, 7));
        assert!(w.prev_enabled);
        assert!(w.next_enabled);
    }

    #[test]
    fn window_clamps_at_edges() {
        let w = window(1, 10, 5);
        assert_eq!((w.start, w.end), (1, 5));
        assert!(!w.prev_enabled);

        let w = window(10, 10, 5);
        assert_eq!((w.start, w.end), (8, 10));
        assert!(!w.next_enabled);
    }

    #[test]
    fn window_smaller_than_size() {
        let w = window(1, 2, 5);
        assert_eq!((w.start, w.end), (1, 2));
    }

    #[test]
    fn slice_bounds_clamp_past_end() {
        assert_eq!(slice_bounds(30, 2, 24), (24, 30));
        assert_eq!(slice_bounds(30, 9, 24), (24, 30));
        assert_eq!(slice_bounds(0, 1, 24), (0, 0));
    }
}
