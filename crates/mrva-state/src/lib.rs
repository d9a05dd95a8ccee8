mod repo_states;
mod repo_task;
pub mod timestamp;

pub use repo_states::FileRunStore;
pub use repo_task::FileRepoTaskStore;
