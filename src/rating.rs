//! Weekly rating arithmetic.
//!
//! Everything here is pure: facts and weights in, a [`WeeklyRating`] out.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    ActivityFacts, AssignmentFacts, AttendanceFacts, EngagementFacts, WeeklyFacts, WeeklyRating,
};

pub const WEIGHT_TOLERANCE: f64 = 0.01;

const EXPECTED_MESSAGES: f64 = 5.0;
const EXPECTED_STUDY_HOURS: f64 = 10.0;
const EXPECTED_MATERIALS: f64 = 5.0;
const ADVISORY_THRESHOLD: f64 = 70.0;

const ASSIGNMENT_ADVICE: &str = "Try to complete more assignments and submit them on time";
const ACTIVITY_ADVICE: &str = "Be more active in the chats: ask questions and join discussions";
const ATTENDANCE_ADVICE: &str = "Try not to miss classes";
const ENGAGEMENT_ADVICE: &str = "Spend more time studying the course materials";
const CONGRATULATIONS: &str = "Excellent work! Keep it up!";
const HELP_OFFER: &str = "Need help? Reach out to your teachers!";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RatingError {
    #[error("invalid rating configuration: {0}")]
    InvalidConfiguration(String),
}

#[derive(Deserialize)]
struct RawWeights {
    assignment_weight: f64,
    activity_weight: f64,
    attendance_weight: f64,
    engagement_weight: f64,
}

/// Weights of the four sub-scores. Always sums to 1.0 within [`WEIGHT_TOLERANCE`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWeights")]
pub struct RatingConfig {
    assignment_weight: f64,
    activity_weight: f64,
    attendance_weight: f64,
    engagement_weight: f64,
}

impl RatingConfig {
    pub fn new(
        assignment_weight: f64,
        activity_weight: f64,
        attendance_weight: f64,
        engagement_weight: f64,
    ) -> Result<Self, RatingError> {
        let named = [
            ("assignment", assignment_weight),
            ("activity", activity_weight),
            ("attendance", attendance_weight),
            ("engagement", engagement_weight),
        ];
        for (name, weight) in named {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RatingError::InvalidConfiguration(format!(
                    "{name} weight must be a non-negative number, got {weight}"
                )));
            }
        }

        let sum = assignment_weight + activity_weight + attendance_weight + engagement_weight;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(RatingError::InvalidConfiguration(format!(
                "weights must sum to 1.0, got {sum:.3}"
            )));
        }

        Ok(Self {
            assignment_weight,
            activity_weight,
            attendance_weight,
            engagement_weight,
        })
    }

    pub fn assignment_weight(&self) -> f64 {
        self.assignment_weight
    }

    pub fn activity_weight(&self) -> f64 {
        self.activity_weight
    }

    pub fn attendance_weight(&self) -> f64 {
        self.attendance_weight
    }

    pub fn engagement_weight(&self) -> f64 {
        self.engagement_weight
    }
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            assignment_weight: 0.4,
            activity_weight: 0.3,
            attendance_weight: 0.2,
            engagement_weight: 0.1,
        }
    }
}

impl TryFrom<RawWeights> for RatingConfig {
    type Error = RatingError;

    fn try_from(raw: RawWeights) -> Result<Self, Self::Error> {
        Self::new(
            raw.assignment_weight,
            raw.activity_weight,
            raw.attendance_weight,
            raw.engagement_weight,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    High,
    Medium,
    Low,
    Critical,
}

impl Category {
    /// Thresholds are closed below: 90.0 is high, 89.99 is medium.
    pub fn for_score(score: f64) -> Self {
        if score >= 90.0 {
            Category::High
        } else if score >= 70.0 {
            Category::Medium
        } else if score >= 50.0 {
            Category::Low
        } else {
            Category::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::High => "high",
            Category::Medium => "medium",
            Category::Low => "low",
            Category::Critical => "critical",
        }
    }

    fn closing_line(self) -> &'static str {
        match self {
            Category::High => "Keep up the great work!",
            Category::Medium => "Good work, and there is still room to grow!",
            Category::Low => "Let's improve these results together!",
            Category::Critical => "Need help? Just reach out!",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub assignment_score: f64,
    pub activity_score: f64,
    pub attendance_score: f64,
    pub engagement_score: f64,
}

impl SubScores {
    pub fn from_facts(facts: &WeeklyFacts) -> Self {
        Self {
            assignment_score: assignment_score(&facts.assignments),
            activity_score: activity_score(&facts.activity),
            attendance_score: attendance_score(&facts.attendance),
            engagement_score: engagement_score(&facts.engagement),
        }
    }

    /// Weighted sum, clamped and rounded to two decimals.
    pub fn composite(&self, config: &RatingConfig) -> f64 {
        let weighted = self.assignment_score * config.assignment_weight()
            + self.activity_score * config.activity_weight()
            + self.attendance_score * config.attendance_weight()
            + self.engagement_score * config.engagement_weight();
        round2(clamp_score(weighted))
    }

    fn rounded(&self) -> Self {
        Self {
            assignment_score: round2(self.assignment_score),
            activity_score: round2(self.activity_score),
            attendance_score: round2(self.attendance_score),
            engagement_score: round2(self.engagement_score),
        }
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// NaN or infinite facts count as missing, zeroing only their own term.
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn assignment_score(facts: &AssignmentFacts) -> f64 {
    if facts.total <= 0 {
        return 0.0;
    }

    let completion = facts.completed as f64 / facts.total as f64 * 80.0;
    let quality = finite_or_zero(facts.average_grade) / 100.0 * 20.0;
    let late_penalty = facts.late as f64 * 5.0;
    clamp_score(completion + quality - late_penalty)
}

pub fn activity_score(facts: &ActivityFacts) -> f64 {
    let volume = (facts.messages_sent as f64 / EXPECTED_MESSAGES).min(1.0) * 100.0;
    let questions = facts.questions_asked as f64 * 3.0;
    clamp_score(volume + questions)
}

/// No scheduled classes counts as perfect attendance.
pub fn attendance_score(facts: &AttendanceFacts) -> f64 {
    if facts.scheduled_classes <= 0 {
        return 100.0;
    }

    clamp_score(facts.attended as f64 / facts.scheduled_classes as f64 * 100.0)
}

pub fn engagement_score(facts: &EngagementFacts) -> f64 {
    let hours = (finite_or_zero(facts.study_hours) / EXPECTED_STUDY_HOURS).min(1.0) * 50.0;
    let materials = (facts.materials_viewed as f64 / EXPECTED_MATERIALS).min(1.0) * 30.0;
    let participation = (finite_or_zero(facts.participation_score) * 0.2).min(20.0);
    clamp_score(hours + materials + participation)
}

pub fn recommendations(scores: &SubScores, weekly_score: f64) -> Vec<String> {
    let advisories = [
        (scores.assignment_score, ASSIGNMENT_ADVICE),
        (scores.activity_score, ACTIVITY_ADVICE),
        (scores.attendance_score, ATTENDANCE_ADVICE),
        (scores.engagement_score, ENGAGEMENT_ADVICE),
    ];

    let mut lines: Vec<String> = advisories
        .into_iter()
        .filter(|(score, _)| *score < ADVISORY_THRESHOLD)
        .map(|(_, advice)| advice.to_string())
        .collect();

    if weekly_score >= 90.0 {
        lines.push(CONGRATULATIONS.to_string());
    } else if weekly_score < 50.0 {
        lines.push(HELP_OFFER.to_string());
    }

    lines
}

pub fn personal_message(
    facts: &WeeklyFacts,
    weekly_score: f64,
    category: Category,
    recommendations: &[String],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Hi, Student #{}!", facts.student_id);
    let _ = writeln!(output);
    let _ = writeln!(output, "Your rating this week: {weekly_score:.1} points");
    let _ = writeln!(output);
    let _ = writeln!(output, "Your activity:");
    let _ = writeln!(
        output,
        "- Assignments completed: {}/{}",
        facts.assignments.completed, facts.assignments.total
    );
    let _ = writeln!(output, "- Chat messages: {}", facts.activity.messages_sent);
    let _ = writeln!(output, "- Attendance: {:.1}%", facts.attendance_rate() * 100.0);
    let _ = writeln!(output);

    if !recommendations.is_empty() {
        let _ = writeln!(output, "Recommendations:");
        for line in recommendations.iter().take(3) {
            let _ = writeln!(output, "- {line}");
        }
        let _ = writeln!(output);
    }

    let _ = writeln!(output, "{}", category.closing_line());
    let _ = writeln!(output);
    let _ = write!(output, "Your AI tutor");

    output
}

pub fn compute_rating(facts: &WeeklyFacts, config: &RatingConfig) -> WeeklyRating {
    let scores = SubScores::from_facts(facts);
    let weekly_score = scores.composite(config);
    let category = Category::for_score(weekly_score);
    let recommendations = recommendations(&scores, weekly_score);
    let personal_message = personal_message(facts, weekly_score, category, &recommendations);

    WeeklyRating {
        student_id: facts.student_id,
        week_start: facts.week_start,
        week_end: facts.week_end,
        weekly_score,
        scores: scores.rounded(),
        category,
        recommendations,
        personal_message,
    }
}
