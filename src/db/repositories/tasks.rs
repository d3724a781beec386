use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};

use crate::{
    clock::day_key,
    db::{
        helpers::{parse_datetime, parse_day, parse_priority},
        keys,
        models::Task,
        Database, StateWrite,
    },
};

const TASK_COLUMNS: &str = "id, title, priority, done, sort_order, day, created_at";

fn row_to_task(row: &Row) -> Result<Task> {
    let priority: String = row.get("priority")?;
    let done: i64 = row.get("done")?;
    let day: String = row.get("day")?;
    let created_at: String = row.get("created_at")?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        priority: parse_priority(&priority)?,
        done: done != 0,
        order: row.get("sort_order")?,
        day: parse_day(&day, "day")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

fn select_task(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
    let mut rows = stmt.query(params![task_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_task(row)?)),
        None => Ok(None),
    }
}

/// Outcome of toggling a task's completion flag.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskToggle {
    pub task: Task,
    pub changed: bool,
}

impl Database {
    pub async fn insert_task(&self, task: &Task) -> Result<()> {
        let record = task.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO tasks (id, title, priority, done, sort_order, day, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.title,
                    record.priority.as_str(),
                    i64::from(record.done),
                    record.order,
                    day_key(record.day),
                    record.created_at.to_rfc3339(),
                    now,
                ],
            )
            .context("failed to insert task")?;
            Ok(())
        })
        .await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let task_id = task_id.to_string();
        self.execute(move |conn| select_task(conn, &task_id)).await
    }

    /// Tasks for one day, open ones first, each group in list order.
    pub async fn tasks_for_day(&self, day: NaiveDate) -> Result<Vec<Task>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS}
                 FROM tasks
                 WHERE day = ?1
                 ORDER BY done ASC, sort_order ASC, created_at ASC"
            ))?;
            let mut rows = stmt.query(params![day_key(day)])?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                tasks.push(row_to_task(row)?);
            }
            Ok(tasks)
        })
        .await
    }

    /// Set `done` and move the task day's `tasksDone` by one in the same
    /// transaction, only when the flag actually flips.
    pub async fn set_task_done(&self, task_id: &str, done: bool) -> Result<Option<TaskToggle>> {
        let task_id = task_id.to_string();
        let toggle = self
            .execute(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let Some(mut task) = select_task(&tx, &task_id)? else {
                    return Ok(None);
                };
                if task.done == done {
                    return Ok(Some(TaskToggle {
                        task,
                        changed: false,
                    }));
                }

                tx.execute(
                    "UPDATE tasks SET done = ?1, updated_at = ?2 WHERE id = ?3",
                    params![i64::from(done), Utc::now().to_rfc3339(), task_id],
                )?;
                let delta = if done { 1 } else { -1 };
                StateWrite::new().tasks_done(task.day, delta).apply(&tx)?;
                tx.commit().context("failed to commit task toggle")?;

                task.done = done;
                Ok(Some(TaskToggle {
                    task,
                    changed: true,
                }))
            })
            .await?;

        if matches!(toggle, Some(TaskToggle { changed: true, .. })) {
            self.publish_change(vec![keys::STATS.to_string()]);
        }
        Ok(toggle)
    }

    /// Delete a task, taking back its `tasksDone` credit if it was done.
    pub async fn delete_task(&self, task_id: &str) -> Result<Option<Task>> {
        let task_id = task_id.to_string();
        let removed = self
            .execute(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let task = select_task(&tx, &task_id)?;
                let Some(task) = task else {
                    return Ok(None);
                };
                tx.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
                if task.done {
                    StateWrite::new().tasks_done(task.day, -1).apply(&tx)?;
                }
                tx.commit().context("failed to commit task delete")?;
                Ok(Some(task))
            })
            .await?;

        if removed.as_ref().is_some_and(|task| task.done) {
            self.publish_change(vec![keys::STATS.to_string()]);
        }
        Ok(removed)
    }

    pub async fn task_count(&self) -> Result<i64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TaskPriority;
    use chrono::TimeZone;

    fn task(id: &str, order: i64, done: bool) -> Task {
        Task {
            id: id.to_string(),
            title: format!("task {id}"),
            priority: TaskPriority::Normal,
            done,
            order,
            day: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn lists_open_tasks_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_task(&task("a", 3, false)).await.unwrap();
        db.insert_task(&task("b", 1, true)).await.unwrap();
        db.insert_task(&task("c", 2, false)).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let ids: Vec<String> = db
            .tasks_for_day(day)
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let other_day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert!(db.tasks_for_day(other_day).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn toggling_moves_tasks_done_only_on_change() {
        let db = Database::open_in_memory().unwrap();
        db.insert_task(&task("a", 1, false)).await.unwrap();

        let toggle = db.set_task_done("a", true).await.unwrap().unwrap();
        assert!(toggle.changed);
        let repeat = db.set_task_done("a", true).await.unwrap().unwrap();
        assert!(!repeat.changed);

        let stats = db.load_state().await.unwrap().stats;
        assert_eq!(stats["2024-03-01"].tasks_completed_delta, 1);

        db.set_task_done("a", false).await.unwrap();
        let stats = db.load_state().await.unwrap().stats;
        assert_eq!(stats["2024-03-01"].tasks_completed_delta, 0);

        assert!(db.set_task_done("missing", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_done_task_takes_back_credit() {
        let db = Database::open_in_memory().unwrap();
        db.insert_task(&task("a", 1, false)).await.unwrap();
        db.set_task_done("a", true).await.unwrap();

        let removed = db.delete_task("a").await.unwrap().unwrap();
        assert!(removed.done);
        assert_eq!(db.task_count().await.unwrap(), 0);

        let stats = db.load_state().await.unwrap().stats;
        assert_eq!(stats["2024-03-01"].tasks_completed_delta, 0);
        assert!(db.delete_task("a").await.unwrap().is_none());
    }
}
