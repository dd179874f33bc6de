//! Physical memory, two-level paging, virtual-memory areas, swap, and
//! the page-fault handler that ties them together.

pub(crate) mod fault;
pub(crate) mod frame;
pub(crate) mod page_table;
pub(crate) mod swap;
pub(crate) mod vma;
