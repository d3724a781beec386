use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{
        models::{Task, TaskPriority},
        Database,
    },
    error::{FocusError, FocusResult},
};

/// Today's task list. Completion changes feed the day's `tasksDone` stat.
#[derive(Clone)]
pub struct TaskList {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl TaskList {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn add(&self, title: &str, priority: TaskPriority) -> FocusResult<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(FocusError::invalid("task title is empty"));
        }

        let now = self.clock.now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            priority,
            done: false,
            order: now.timestamp_millis(),
            day: self.clock.today(),
            created_at: now,
        };
        self.db
            .insert_task(&task)
            .await
            .map_err(FocusError::Persistence)?;
        log::info!("task added: {}", task.title);
        Ok(task)
    }

    pub async fn today(&self) -> FocusResult<Vec<Task>> {
        self.for_day(self.clock.today()).await
    }

    pub async fn for_day(&self, day: NaiveDate) -> FocusResult<Vec<Task>> {
        self.db
            .tasks_for_day(day)
            .await
            .map_err(FocusError::Persistence)
    }

    pub async fn set_done(&self, task_id: &str, done: bool) -> FocusResult<Task> {
        let toggle = self
            .db
            .set_task_done(task_id, done)
            .await
            .map_err(FocusError::Persistence)?
            .ok_or_else(|| FocusError::invalid(format!("no task with id {task_id}")))?;
        Ok(toggle.task)
    }

    pub async fn delete(&self, task_id: &str) -> FocusResult<Task> {
        self.db
            .delete_task(task_id)
            .await
            .map_err(FocusError::Persistence)?
            .ok_or_else(|| FocusError::invalid(format!("no task with id {task_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{day_key, ManualClock};
    use chrono::{Duration, TimeZone, Utc};

    fn list() -> (TaskList, Arc<ManualClock>) {
        let db = Database::open_in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        (TaskList::new(db, clock.clone()), clock)
    }

    #[tokio::test]
    async fn add_trims_and_rejects_blank_titles() {
        let (tasks, _) = list();
        let task = tasks.add("  write report ", TaskPriority::High).await.unwrap();
        assert_eq!(task.title, "write report");
        assert!(!task.done);

        let err = tasks.add("   ", TaskPriority::Low).await.unwrap_err();
        assert!(matches!(err, FocusError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn completing_updates_the_task_day() {
        let (tasks, clock) = list();
        let task = tasks.add("review", TaskPriority::Normal).await.unwrap();
        let created_day = clock.today();

        // Completed the next day, credited to the day the task belongs to.
        clock.advance(Duration::days(1));
        tasks.set_done(&task.id, true).await.unwrap();

        let stats = tasks.db.load_state().await.unwrap().stats;
        assert_eq!(stats[&day_key(created_day)].tasks_completed_delta, 1);
        assert!(!stats.contains_key(&day_key(clock.today())));
    }

    #[tokio::test]
    async fn today_lists_open_tasks_first() {
        let (tasks, clock) = list();
        let first = tasks.add("first", TaskPriority::Normal).await.unwrap();
        clock.advance(Duration::seconds(1));
        tasks.add("second", TaskPriority::Normal).await.unwrap();
        tasks.set_done(&first.id, true).await.unwrap();

        let titles: Vec<String> = tasks
            .today()
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn unknown_ids_are_invalid_input() {
        let (tasks, _) = list();
        assert!(matches!(
            tasks.set_done("nope", true).await.unwrap_err(),
            FocusError::InvalidInput(_)
        ));
        assert!(tasks.delete("nope").await.is_err());
    }
}
