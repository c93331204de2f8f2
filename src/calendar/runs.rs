use crate::model::*;

// ── Run-length encoding ───────────────────────────────────────────

/// Compress a month's day states into maximal runs.
///
/// `days[0]` is day `first_day`; a run closes whenever the state changes.
pub fn encode_runs(days: &[StateCode], first_day: u32) -> Vec<DecodedRun> {
    let mut runs: Vec<DecodedRun> = Vec::new();
    for (offset, &state) in days.iter().enumerate() {
        let day = first_day + offset as u32;
        if let Some(last) = runs.last_mut()
            && last.state == state {
                last.end_day = day;
                continue;
            }
        runs.push(DecodedRun {
            state,
            start_day: day,
            end_day: day,
        });
    }
    runs
}

/// Encode the `[first_day, last_day]` slice of a month record.
pub fn encode_month(record: &MonthRecord, first_day: u32, last_day: u32) -> MonthRuns {
    let last_day = last_day.min(record.len());
    let days: &[StateCode] = if first_day <= last_day {
        &record.days()[(first_day - 1) as usize..last_day as usize]
    } else {
        &[]
    };
    MonthRuns {
        year: record.year,
        month: record.month,
        runs: encode_runs(days, first_day),
    }
}

/// Collapse tentative (negative) states into the single tentative bucket
/// unless raw codes were asked for.
pub fn visible_state(state: StateCode, confirmed: bool) -> StateCode {
    if !confirmed && state < 0 {
        TENTATIVE_STATE
    } else {
        state
    }
}
