//! Canonical pipeline stages.
//!
//! | Stage            | Kind              | Effect                                        |
//! |------------------|-------------------|-----------------------------------------------|
//! | `SplitDelimitedLists` | pre-load     | `"1,2"` becomes `["1", "2"]` for list fields  |
//! | `Pagination`     | schema validator  | limit/offset or page/per_page must be valid   |
//! | `NormalizePagination` | post-load    | page/per_page into limit/offset               |
//! | `ComposeQuery`   | post-load         | query-annotated fields into one filter        |
//! | `FetchPage`      | post-load         | filtered, paged fetch                         |
//! | `CountMatching`  | post-load         | count of rows matching the filter             |
//! | `CheckForeignKeys` | post-load       | key existence, records pending links          |
//! | `MaterializeInstance` | post-load    | create or update, then link, in one scope     |
//! | `AncestorCycleCheck` | schema validator | rejects parent pointers that form a cycle |
//! | `ResolveDumpRelations` | pre-dump    | resolves relations the output declares        |

mod ancestry;
mod keys;
mod lists;
mod materialize;
mod pagination;
mod query;
mod resolve;

pub use ancestry::AncestorCycleCheck;
pub use keys::CheckForeignKeys;
pub use lists::SplitDelimitedLists;
pub use materialize::{delete_by_id, MaterializeInstance};
pub use pagination::{NormalizePagination, Pagination};
pub use query::{ComposeQuery, CountMatching, FetchPage, QueryOverride};
pub use resolve::{resolve_for_dump, ResolveDumpRelations};
