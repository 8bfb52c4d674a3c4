//! Builds the `loudnorm` filter invocations for both passes. Parameter
//! names, order and units are the filter's external contract: `I` and
//! `measured_thresh` in LUFS, `TP` in dBTP, `LRA` and `offset` in LU.

use crate::LoudnessTargets;
use crate::measure::MeasuredLoudness;

/// First pass: measurement only, report printed as JSON on the diagnostic
/// stream.
pub fn analysis_filter(targets: &LoudnessTargets) -> String {
    format!(
        "loudnorm=I={}:TP={}:LRA={}:print_format=json",
        targets.integrated, targets.true_peak, targets.loudness_range
    )
}

/// Second pass: requested targets plus the measured values feeding the
/// linear correction.
pub fn second_pass_filter(targets: &LoudnessTargets, measured: &MeasuredLoudness) -> String {
    format!(
        "loudnorm=I={}:TP={}:LRA={}:\
         measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:\
         offset={}:linear=true:print_format=summary",
        targets.integrated,
        targets.true_peak,
        targets.loudness_range,
        measured.input_i,
        measured.input_tp,
        measured.input_lra,
        measured.input_thresh,
        measured.target_offset,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_filter_uses_default_targets() {
        assert_eq!(
            analysis_filter(&LoudnessTargets::default()),
            "loudnorm=I=-14:TP=-1.5:LRA=11:print_format=json"
        );
    }

    #[test]
    fn second_pass_embeds_all_measured_and_target_values() {
        let targets = LoudnessTargets {
            integrated: -14.0,
            true_peak: -1.5,
            loudness_range: 11.0,
        };
        let measured = MeasuredLoudness {
            input_i: -20.0,
            input_tp: -3.0,
            input_lra: 8.0,
            input_thresh: -30.0,
            target_offset: 0.5,
        };
        assert_eq!(
            second_pass_filter(&targets, &measured),
            "loudnorm=I=-14:TP=-1.5:LRA=11:\
             measured_I=-20:measured_TP=-3:measured_LRA=8:measured_thresh=-30:\
             offset=0.5:linear=true:print_format=summary"
        );
    }
}
