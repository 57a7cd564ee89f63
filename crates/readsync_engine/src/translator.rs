//! Progress translation between local page indices and remote page numbers.
//!
//! Local positions are 0-based indices into the reader's own pagination;
//! remote positions are 1-based page numbers of a specific edition. For
//! reflowable books the two scales differ, so pages are mapped through the
//! completion fraction. Fixed-layout books share the publisher's pagination
//! and map one to one.

/// How the local reader paginates a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Pagination depends on font and viewport.
    #[default]
    Reflowable,
    /// Pages are fixed by the publisher (PDF, comics).
    FixedLayout,
}

/// Converts a local 0-based page index to a remote page number.
///
/// With an unknown remote total the local 1-based page number is sent as is;
/// the remote total becomes known after the first successful read.
pub fn to_remote(
    page_index: u32,
    local_total: u32,
    remote_total: Option<u32>,
    layout: Layout,
) -> u32 {
    let page = page_index.saturating_add(1);
    if layout == Layout::FixedLayout || local_total == 0 {
        return page;
    }
    match remote_total {
        Some(remote) if remote > 0 && remote != local_total => {
            let fraction = f64::from(page) / f64::from(local_total);
            (fraction * f64::from(remote)).round() as u32
        }
        _ => page,
    }
}

/// Converts a remote page number to a local 0-based page index.
///
/// The result is clamped to `0..local_total`. Remote page 0 (nothing read)
/// maps to the first page.
pub fn from_remote(
    remote_page: u32,
    local_total: u32,
    remote_total: Option<u32>,
    layout: Layout,
) -> u32 {
    let last = local_total.saturating_sub(1);
    if remote_page == 0 {
        return 0;
    }
    let page = match (layout, remote_total) {
        (Layout::FixedLayout, _) => remote_page,
        (_, Some(remote)) if remote > 0 && local_total > 0 => {
            let fraction = f64::from(remote_page) / f64::from(remote);
            (fraction * f64::from(local_total)).round() as u32
        }
        // Unknown total: assume the remote already speaks local pages.
        _ => remote_page,
    };
    page.saturating_sub(1).min(last)
}

/// Returns completion in `[0, 1]` for a local position.
pub fn completion(page_index: u32, local_total: u32) -> f64 {
    if local_total == 0 {
        return 0.0;
    }
    (f64::from(page_index.saturating_add(1)) / f64::from(local_total)).min(1.0)
}
