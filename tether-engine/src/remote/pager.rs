//! Collect every page of a paginated listing.

use std::future::Future;

use super::types::{Page, PageRequest};
use crate::error::ApiResult;

pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Fetch pages starting at 1 until the reported total is reached or a page
/// comes back empty. The first failing page fails the whole listing.
pub async fn list_all<T, F, Fut>(items_per_page: usize, mut fetch: F) -> ApiResult<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut page_num = 1;
    loop {
        let page = fetch(PageRequest {
            page_num,
            items_per_page,
        })
        .await?;
        let received = page.results.len();
        items.extend(page.results);
        if received == 0 || items.len() >= page.total_count {
            return Ok(items);
        }
        page_num += 1;
    }
}
