pub mod core {
    pub mod value;
}

pub mod records {
    pub mod batch;
    pub mod row;
}

pub mod execution {
    pub mod errors;
    pub mod outcome;
    pub mod stats;
    pub mod summary;
}
