pub mod auth_service;
pub mod lease_service;
pub mod presence_service;
pub mod revision_service;
pub mod section_service;
pub mod section_tree;
