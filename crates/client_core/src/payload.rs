use shared::protocol::{QueryPayload, SortSpec};

use crate::{error::DataSourceError, filters::FilterSource};

/// User-controlled inputs that select the next page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewParameters {
    pub page: u32,
    pub items_per_page: u32,
    pub sort_by: SortSpec,
    /// Tracked for change detection; the list endpoints take sort direction from the keys.
    pub sort_desc: bool,
}

impl ViewParameters {
    pub fn with_page_size(items_per_page: u32) -> Self {
        Self {
            items_per_page,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), DataSourceError> {
        if self.page == 0 {
            return Err(DataSourceError::InvalidParameter {
                name: "page",
                value: self.page,
            });
        }
        if self.items_per_page == 0 {
            return Err(DataSourceError::InvalidParameter {
                name: "items_per_page",
                value: self.items_per_page,
            });
        }
        Ok(())
    }
}

impl Default for ViewParameters {
    fn default() -> Self {
        Self {
            page: 1,
            items_per_page: 10,
            sort_by: SortSpec::default(),
            sort_desc: false,
        }
    }
}

pub fn build_payload(view: &ViewParameters, filters: &FilterSource) -> QueryPayload {
    let filter = filters
        .resolve()
        .into_iter()
        .map(|(name, value)| (name, value.into_resolved()))
        .collect();

    QueryPayload {
        page: view.page,
        per_page: view.items_per_page,
        sort_by: view.sort_by.keys(),
        filter,
    }
}

pub fn page_count(total_count: u64, items_per_page: u32) -> u64 {
    if items_per_page == 0 {
        return 0;
    }
    total_count.div_ceil(u64::from(items_per_page))
}
