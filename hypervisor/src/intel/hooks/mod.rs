pub mod hook_manager;
pub mod state;
