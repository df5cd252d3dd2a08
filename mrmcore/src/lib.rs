// data module
pub mod data {
    pub mod record;
    pub mod tier;
    pub mod transition;
    pub mod result;
}

// algorithm module
pub mod algorithm {
    pub mod collision;
    pub mod interference;
    pub mod method;
    pub mod coverage;
    pub mod overlap;
}
