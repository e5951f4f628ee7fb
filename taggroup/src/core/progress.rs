//! Progress aggregation over an execution's steps.

use crate::core::types::{Progress, StepStatus, TagGroupExecution};

pub fn calculate_progress(execution: &TagGroupExecution) -> Progress {
    let count = |status: StepStatus| {
        execution
            .steps
            .iter()
            .filter(|step| step.status == status)
            .count()
    };
    let total_steps = execution.steps.len();
    Progress {
        total_steps,
        current_step: if total_steps == 0 {
            0
        } else {
            execution.current_step_index + 1
        },
        completed_steps: count(StepStatus::Completed),
        skipped_steps: count(StepStatus::Skipped),
        failed_steps: count(StepStatus::Failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::create_execution;
    use crate::test_support::{completed, template};

    #[test]
    fn counts_terminal_states_and_reports_one_based_cursor() {
        let templates = vec![
            template("t1", "g-001", ""),
            template("t2", "g-002", ""),
            template("t3", "g-003", ""),
            template("t4", "g-004", ""),
        ];
        let mut execution = create_execution("e", "g", &templates, None).expect("execution");
        let fresh = calculate_progress(&execution);
        assert_eq!(fresh.current_step, 1);
        assert_eq!(fresh.finished_steps(), 0);

        execution.mark_completed(completed("a"));
        execution.advance();
        execution.mark_skipped();
        execution.advance();
        execution.mark_failed("x");

        let progress = calculate_progress(&execution);
        assert_eq!(
            progress,
            Progress {
                total_steps: 4,
                current_step: 3,
                completed_steps: 1,
                skipped_steps: 1,
                failed_steps: 1,
            }
        );
        assert_eq!(progress.percent_done(), 50);
    }

    #[test]
    fn finished_steps_never_exceed_total() {
        let templates = vec![template("t1", "g-001", ""), template("t2", "g-002", "")];
        let mut execution = create_execution("e", "g", &templates, None).expect("execution");
        let mut previous = 0;
        for _ in 0..3 {
            execution.mark_failed("x");
            execution.mark_skipped();
            execution.mark_completed(completed("y"));
            execution.advance();
            let progress = calculate_progress(&execution);
            assert!(progress.finished_steps() <= progress.total_steps);
            assert!(progress.finished_steps() >= previous);
            previous = progress.finished_steps();
        }
        assert_eq!(previous, 2);
    }
}
