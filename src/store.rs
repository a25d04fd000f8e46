use crate::models::{Student, WeekWindow, WeeklyFacts};

/// Lookups the rating workflow needs from persistence.
pub trait TutorStore {
    async fn find_student(&self, student_id: i64) -> anyhow::Result<Option<Student>>;

    async fn weekly_facts(&self, student_id: i64, week: WeekWindow)
        -> anyhow::Result<WeeklyFacts>;
}
