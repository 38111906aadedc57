//! Task and reward catalog
//!
//! Plain CRUD over the catalog column families. The catalog is a dependency
//! leaf: it is not on the ledger's consistency-critical path, and deleting a
//! task or reward never alters committed entries (they store the cause as a
//! reference, not a live pointer).

use crate::{
    error::{Error, Result},
    types::{Reward, Task},
    Storage,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Catalog of task and reward definitions
pub struct Catalog {
    storage: Arc<Storage>,
}

impl Catalog {
    /// Create catalog over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    // Task operations

    /// Create a new task
    pub fn create_task(
        &self,
        name: &str,
        description: &str,
        chip_value: u32,
        recurring: bool,
    ) -> Result<Task> {
        if chip_value == 0 {
            return Err(Error::InvalidAmount(
                "task chip value must be positive".to_string(),
            ));
        }

        let task = Task {
            task_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            chip_value,
            recurring,
            active: true,
            created_at: Utc::now(),
        };

        self.storage.put_task(&task)?;
        Ok(task)
    }

    /// Get task by ID
    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.storage
            .get_task(task_id)?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Update an existing task
    pub fn update_task(&self, task: &Task) -> Result<()> {
        if task.chip_value == 0 {
            return Err(Error::InvalidAmount(
                "task chip value must be positive".to_string(),
            ));
        }
        self.get_task(&task.task_id)?;
        self.storage.put_task(task)
    }

    /// Delete task by ID
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        self.get_task(task_id)?;
        self.storage.delete_task(task_id)
    }

    /// List all tasks
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        self.storage.list_tasks()
    }

    // Reward operations

    /// Create a new reward
    pub fn create_reward(&self, name: &str, description: &str, chip_cost: u32) -> Result<Reward> {
        if chip_cost == 0 {
            return Err(Error::InvalidAmount(
                "reward chip cost must be positive".to_string(),
            ));
        }

        let reward = Reward {
            reward_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            chip_cost,
            active: true,
            created_at: Utc::now(),
        };

        self.storage.put_reward(&reward)?;
        Ok(reward)
    }

    /// Get reward by ID
    pub fn get_reward(&self, reward_id: &str) -> Result<Reward> {
        self.storage
            .get_reward(reward_id)?
            .ok_or_else(|| Error::RewardNotFound(reward_id.to_string()))
    }

    /// Update an existing reward
    pub fn update_reward(&self, reward: &Reward) -> Result<()> {
        if reward.chip_cost == 0 {
            return Err(Error::InvalidAmount(
                "reward chip cost must be positive".to_string(),
            ));
        }
        self.get_reward(&reward.reward_id)?;
        self.storage.put_reward(reward)
    }

    /// Delete reward by ID
    pub fn delete_reward(&self, reward_id: &str) -> Result<()> {
        self.get_reward(reward_id)?;
        self.storage.delete_reward(reward_id)
    }

    /// List all rewards
    pub fn list_rewards(&self) -> Result<Vec<Reward>> {
        self.storage.list_rewards()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use tempfile::TempDir;

    fn test_catalog() -> (Catalog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (Catalog::new(storage), temp_dir)
    }

    #[test]
    fn test_task_lifecycle() {
        let (catalog, _temp) = test_catalog();

        let task = catalog
            .create_task("Clean room", "Tidy up before dinner", 10, true)
            .unwrap();
        assert!(task.active);

        let mut fetched = catalog.get_task(&task.task_id).unwrap();
        assert_eq!(fetched.chip_value, 10);

        fetched.active = false;
        fetched.chip_value = 15;
        catalog.update_task(&fetched).unwrap();
        assert_eq!(catalog.get_task(&task.task_id).unwrap().chip_value, 15);

        catalog.delete_task(&task.task_id).unwrap();
        assert!(matches!(
            catalog.get_task(&task.task_id),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_reward_lifecycle() {
        let (catalog, _temp) = test_catalog();

        let reward = catalog.create_reward("Ice cream", "One scoop", 6).unwrap();
        assert_eq!(catalog.list_rewards().unwrap().len(), 1);

        catalog.delete_reward(&reward.reward_id).unwrap();
        assert!(catalog.list_rewards().unwrap().is_empty());
    }

    #[test]
    fn test_zero_value_rejected() {
        let (catalog, _temp) = test_catalog();

        assert!(matches!(
            catalog.create_task("Free", "", 0, false),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            catalog.create_reward("Free", "", 0),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_update_missing_task_fails() {
        let (catalog, _temp) = test_catalog();

        let task = Task {
            task_id: "nope".to_string(),
            name: "Ghost".to_string(),
            description: String::new(),
            chip_value: 5,
            recurring: false,
            active: true,
            created_at: Utc::now(),
        };
        assert!(matches!(
            catalog.update_task(&task),
            Err(Error::TaskNotFound(_))
        ));
        assert!(matches!(
            catalog.delete_task("nope"),
            Err(Error::TaskNotFound(_))
        ));
    }
}
