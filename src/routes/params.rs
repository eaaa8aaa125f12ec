use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct Pagination {
    /// Page number, default 1
    pub page: Option<i64>,
    /// Items per page, default 20, max 100
    pub per_page: Option<i64>,
}

const MAX_PER_PAGE: i64 = 100;
/// Keeps `(page - 1) * per_page` inside `i64` for any query string.
const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

impl Pagination {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).clamp(1, MAX_PAGE);
        let per_page = self.per_page.unwrap_or(20).clamp(1, MAX_PER_PAGE);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Paging fields are spelled out: `serde(flatten)` would hand them to
/// the urlencoded deserializer as strings and reject `?page=2`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct OrderListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl OrderListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination {
            page: Some(0),
            per_page: Some(500),
        };
        assert_eq!(p.normalize(), (1, 100, 0));

        let p = Pagination {
            page: Some(3),
            per_page: None,
        };
        assert_eq!(p.normalize(), (3, 20, 40));
    }

    #[test]
    fn huge_page_does_not_overflow_offset() {
        let p = Pagination {
            page: Some(i64::MAX),
            per_page: Some(100),
        };
        let (page, per_page, offset) = p.normalize();
        assert_eq!(page, MAX_PAGE);
        assert_eq!(per_page, 100);
        assert!(offset > 0);

        let p = Pagination {
            page: Some(i64::MIN),
            per_page: Some(i64::MIN),
        };
        assert_eq!(p.normalize(), (1, 1, 0));
    }

    #[test]
    fn order_query_parses_numeric_paging() {
        let query: OrderListQuery =
            serde_json::from_value(serde_json::json!({"page": 2, "sort_order": "asc"})).unwrap();
        assert_eq!(query.pagination().normalize(), (2, 20, 20));
        assert!(matches!(query.sort_order, Some(SortOrder::Asc)));
    }
}
