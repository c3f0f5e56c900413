use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A request for one page of an ordered result set.
///
/// `first_item` is 1-based. The default is [`PagingRequest::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPagingRequest")]
pub struct PagingRequest {
    first_item: usize,
    paging_size: usize,
}

impl PagingRequest {
    /// Every item, no limit.
    pub const ALL: Self = Self {
        first_item: 1,
        paging_size: usize::MAX,
    };

    /// No items; only the total count is computed.
    pub const NONE: Self = Self {
        first_item: 1,
        paging_size: 0,
    };

    /// Just the first item.
    pub const ONE: Self = Self {
        first_item: 1,
        paging_size: 1,
    };

    /// Page `page` (1-based) of `paging_size` items.
    pub fn of_page(page: usize, paging_size: usize) -> Result<Self> {
        if page == 0 {
            return Err(Error::InvalidArgument("page must be 1 or greater".to_string()));
        }
        let first_item = (page - 1)
            .checked_mul(paging_size)
            .and_then(|skipped| skipped.checked_add(1))
            .ok_or_else(|| Error::InvalidArgument("page is out of range".to_string()))?;
        Ok(Self {
            first_item,
            paging_size,
        })
    }

    /// `paging_size` items starting at the 0-based `index`.
    pub fn of_index(index: usize, paging_size: usize) -> Result<Self> {
        let first_item = index
            .checked_add(1)
            .ok_or_else(|| Error::InvalidArgument("index is out of range".to_string()))?;
        Ok(Self {
            first_item,
            paging_size,
        })
    }

    #[must_use]
    pub const fn first_item(&self) -> usize {
        self.first_item
    }

    /// The 0-based offset of the first item.
    #[must_use]
    pub const fn first_item_index(&self) -> usize {
        self.first_item.saturating_sub(1)
    }

    #[must_use]
    pub const fn paging_size(&self) -> usize {
        self.paging_size
    }

    #[must_use]
    pub const fn is_all(&self) -> bool {
        self.first_item == 1 && self.paging_size == usize::MAX
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.paging_size == 0
    }

    pub fn sql_offset(&self) -> i64 {
        i64::try_from(self.first_item_index()).unwrap_or(i64::MAX)
    }

    pub fn sql_limit(&self) -> i64 {
        i64::try_from(self.paging_size).unwrap_or(i64::MAX)
    }
}

/// Wire form of a [`PagingRequest`], checked on the way in.
#[derive(Deserialize)]
struct RawPagingRequest {
    first_item: usize,
    paging_size: usize,
}

impl TryFrom<RawPagingRequest> for PagingRequest {
    type Error = Error;

    fn try_from(raw: RawPagingRequest) -> Result<Self> {
        if raw.first_item == 0 {
            return Err(Error::InvalidArgument(
                "first item must be 1 or greater".to_string(),
            ));
        }
        Self::of_index(raw.first_item - 1, raw.paging_size)
    }
}

impl Default for PagingRequest {
    fn default() -> Self {
        Self::ALL
    }
}

/// Describes the page actually returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Paging {
    pub first_item: usize,
    pub paging_size: usize,
    pub total_items: usize,
}

impl Paging {
    #[must_use]
    pub const fn of(request: PagingRequest, total_items: usize) -> Self {
        Self {
            first_item: request.first_item(),
            paging_size: request.paging_size(),
            total_items,
        }
    }

    #[must_use]
    pub const fn request(&self) -> PagingRequest {
        PagingRequest {
            first_item: self.first_item,
            paging_size: self.paging_size,
        }
    }

    /// Number of the last item on this page (1-based), capped at the total.
    #[must_use]
    pub fn last_item(&self) -> usize {
        self.first_item
            .saturating_add(self.paging_size)
            .saturating_sub(1)
            .min(self.total_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_all() {
        let req = PagingRequest::default();
        assert!(req.is_all());
        assert_eq!(req.first_item(), 1);
        assert_eq!(req.sql_offset(), 0);
        assert_eq!(req.sql_limit(), i64::MAX);
    }

    #[test]
    fn test_of_page() {
        let req = PagingRequest::of_page(2, 20).unwrap();
        assert_eq!(req.first_item(), 21);
        assert_eq!(req.first_item_index(), 20);
        assert_eq!(req.paging_size(), 20);
        assert!(PagingRequest::of_page(0, 20).is_err());
    }

    #[test]
    fn test_of_index() {
        let req = PagingRequest::of_index(3, 2).unwrap();
        assert_eq!(req.first_item(), 4);
        assert_eq!(req.sql_offset(), 3);
    }

    #[test]
    fn test_deserialize_validates_first_item() {
        let req: PagingRequest =
            serde_json::from_str(r#"{"first_item": 3, "paging_size": 2}"#).unwrap();
        assert_eq!(req, PagingRequest::of_index(2, 2).unwrap());

        let zero = serde_json::from_str::<PagingRequest>(r#"{"first_item": 0, "paging_size": 5}"#);
        assert!(zero.is_err());
    }

    #[test]
    fn test_round_trips_through_json() {
        let req = PagingRequest::of_page(3, 10).unwrap();
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(serde_json::from_str::<PagingRequest>(&json).unwrap(), req);
    }

    #[test]
    fn test_zero_first_item_in_result_does_not_underflow() {
        let paging = Paging {
            first_item: 0,
            paging_size: 5,
            total_items: 10,
        };
        assert_eq!(paging.request().first_item_index(), 0);
        assert_eq!(paging.request().sql_offset(), 0);
    }

    #[test]
    fn test_paging_last_item() {
        let paging = Paging::of(PagingRequest::of_page(2, 2).unwrap(), 3);
        assert_eq!(paging.first_item, 3);
        assert_eq!(paging.last_item(), 3);
        assert_eq!(paging.request(), PagingRequest::of_page(2, 2).unwrap());

        let all = Paging::of(PagingRequest::ALL, 5);
        assert_eq!(all.last_item(), 5);
    }
}
