//! Response collection
//!
//! Walks the user through the questionnaire one question at a time. Slider
//! (scale/numeric) answers live in transient state until the user confirms
//! with `next()`; choice answers are committed as soon as they are recorded.

use crate::error::PipelineError;
use crate::types::{AnswerMap, AnswerValue, Question};

/// Result of advancing the walk
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorStep {
    /// Moved to the question at this index
    Advanced(usize),
    /// The last question was confirmed and every question is answered
    Submitted(AnswerMap),
}

/// Stateful questionnaire walk
#[derive(Debug, Clone)]
pub struct ResponseCollector {
    questions: Vec<Question>,
    position: usize,
    answers: AnswerMap,
    slider: Option<f64>,
}

impl ResponseCollector {
    pub fn new(questions: Vec<Question>) -> Result<Self, PipelineError> {
        if questions.is_empty() {
            return Err(PipelineError::NoValidQuestions);
        }

        let mut collector = Self {
            questions,
            position: 0,
            answers: AnswerMap::new(),
            slider: None,
        };
        collector.load_slider();
        Ok(collector)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current(&self) -> &Question {
        &self.questions[self.position]
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn answers(&self) -> &AnswerMap {
        &self.answers
    }

    /// Uncommitted slider value of the current question, if it is a slider
    pub fn slider_value(&self) -> Option<f64> {
        self.slider
    }

    pub fn is_last(&self) -> bool {
        self.position + 1 == self.questions.len()
    }

    pub fn unanswered(&self) -> usize {
        (0..self.questions.len())
            .filter(|i| !self.answers.contains_key(i))
            .count()
    }

    /// Record an answer for `index`
    ///
    /// Slider answers must be numeric (text is parsed) and are clamped to the
    /// range. For the current slider question the value only moves the
    /// slider; it is committed on `next()`. Everything else is committed
    /// immediately.
    pub fn record_answer(
        &mut self,
        index: usize,
        value: impl Into<AnswerValue>,
    ) -> Result<(), PipelineError> {
        let question = self.questions.get(index).ok_or_else(|| {
            PipelineError::Validation(format!(
                "Question index {} out of range (0..{})",
                index,
                self.questions.len()
            ))
        })?;
        let value = value.into();

        let Some(range) = question.kind.range() else {
            self.answers.insert(index, value);
            return Ok(());
        };

        let number = slider_number(&value).ok_or_else(|| {
            PipelineError::Validation(format!("Answer for question {index} is not a number"))
        })?;
        let number = range.clamp(number);

        if index == self.position {
            self.slider = Some(number);
        } else {
            self.answers.insert(index, AnswerValue::Number(number));
        }
        Ok(())
    }

    /// Confirm the current question and move forward, or submit on the last one
    pub fn next(&mut self) -> Result<CollectorStep, PipelineError> {
        self.commit_slider();

        if self.is_last() {
            return self.submit().map(CollectorStep::Submitted);
        }

        self.position += 1;
        self.load_slider();
        Ok(CollectorStep::Advanced(self.position))
    }

    /// Move back one question, discarding the uncommitted slider value
    pub fn previous(&mut self) -> bool {
        if self.position == 0 {
            return false;
        }
        self.position -= 1;
        self.load_slider();
        true
    }

    /// Completeness gate: every question index must have an answer
    pub fn submit(&mut self) -> Result<AnswerMap, PipelineError> {
        self.commit_slider();

        let unanswered = self.unanswered();
        if unanswered > 0 {
            return Err(PipelineError::Validation(format!(
                "{} of {} questions unanswered",
                unanswered,
                self.questions.len()
            )));
        }
        Ok(self.answers.clone())
    }

    fn commit_slider(&mut self) {
        if let Some(value) = self.slider {
            self.answers
                .insert(self.position, AnswerValue::Number(value.round()));
        }
    }

    fn load_slider(&mut self) {
        self.slider = self.current().kind.range().map(|range| {
            match self.answers.get(&self.position) {
                Some(AnswerValue::Number(n)) => *n,
                _ => range.midpoint(),
            }
        });
    }
}

fn slider_number(value: &AnswerValue) -> Option<f64> {
    let n = match value {
        AnswerValue::Number(n) => *n,
        AnswerValue::Text(t) => t.trim().parse::<f64>().ok()?,
    };
    n.is_finite().then_some(n)
}
