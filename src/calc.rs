//! Pure fee and exam arithmetic. Everything here is total: missing values
//! are treated as zero and no function panics or touches the store.

/// Monetary rounding to two decimals. Derived ledger columns are always
/// written through this so stored totals agree with what callers computed.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// The ten fee components of a ledger row. `total_course_fees` is the
/// snapshot copied from the course offering; the rest are per-student.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeeComponents {
    pub total_course_fees: f64,
    pub enrollment_fee: f64,
    pub eligibility_certificate_fee: f64,
    pub university_affiliation_fee: f64,
    pub university_sports_fee: f64,
    pub university_development_fee: f64,
    pub tc_cc_fee: f64,
    pub miscellaneous_fee_1: f64,
    pub miscellaneous_fee_2: f64,
    pub miscellaneous_fee_3: f64,
}

pub fn total_fee(c: &FeeComponents) -> f64 {
    round2(
        c.total_course_fees
            + c.enrollment_fee
            + c.eligibility_certificate_fee
            + c.university_affiliation_fee
            + c.university_sports_fee
            + c.university_development_fee
            + c.tc_cc_fee
            + c.miscellaneous_fee_1
            + c.miscellaneous_fee_2
            + c.miscellaneous_fee_3,
    )
}

pub fn total_paid(installments: &[f64; 6]) -> f64 {
    round2(installments.iter().sum())
}

pub fn after_rebate(total_fee: f64, rebate_amount: f64, rebate_granted: bool) -> f64 {
    if rebate_granted {
        round2(total_fee - rebate_amount)
    } else {
        round2(total_fee)
    }
}

pub fn amount_due(after_rebate: f64, total_paid: f64) -> f64 {
    round2(after_rebate - total_paid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Paid,
    Partial,
    Pending,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Partial => "Partial",
            PaymentStatus::Pending => "Pending",
        }
    }
}

/// Overpayment drives `amount_due` negative; that still reads as `Paid`.
pub fn payment_status(total_fee: f64, total_paid: f64, amount_due: f64) -> PaymentStatus {
    if amount_due <= 0.0 && total_fee > 0.0 {
        PaymentStatus::Paid
    } else if total_paid > 0.0 {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Pending
    }
}

/// Grade bands with inclusive lower bounds.
pub fn grade(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "A+"
    } else if percentage >= 80.0 {
        "A"
    } else if percentage >= 70.0 {
        "B+"
    } else if percentage >= 60.0 {
        "B"
    } else if percentage >= 50.0 {
        "C+"
    } else if percentage >= 40.0 {
        "C"
    } else {
        "F"
    }
}

pub fn passes(percentage: f64) -> bool {
    percentage >= 40.0
}

/// Scholarship / rebate track state. One field instead of three monotone
/// booleans: the boolean projection below cannot get out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScholarshipStatus {
    #[default]
    NotApplied,
    Applied,
    Approved,
    Rejected,
    Granted,
}

impl ScholarshipStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Not Applied" => Some(Self::NotApplied),
            "Applied" => Some(Self::Applied),
            "Approved" => Some(Self::Approved),
            "Rejected" => Some(Self::Rejected),
            "Granted" => Some(Self::Granted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotApplied => "Not Applied",
            Self::Applied => "Applied",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Granted => "Granted",
        }
    }

    pub fn applied(self) -> bool {
        matches!(self, Self::Applied | Self::Approved | Self::Granted)
    }

    pub fn approved(self) -> bool {
        matches!(self, Self::Approved | Self::Granted)
    }

    pub fn granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// The stored postal address is the comma-joined non-empty subset of the
/// four address parts, recomputed whenever any part changes.
pub fn concatenate_address(
    street: Option<&str>,
    area_village: Option<&str>,
    city_tehsil: Option<&str>,
    state: Option<&str>,
) -> String {
    [street, area_village, city_tehsil, state]
        .iter()
        .filter_map(|p| p.map(str::trim))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ordinal position of a `year_semester` label inside a course progression:
/// "1st Year" and "1st Sem" parse to 1, "FY"/"SY"/"TY" to 1/2/3, bare
/// numbers to themselves, "final" to a sentinel sorting last.
pub fn year_semester_order(label: &str) -> Option<i64> {
    let label = label.trim().to_ascii_lowercase();
    if label.is_empty() {
        return None;
    }

    if let Some(n) = ordinal_prefix(&label, "sem").or_else(|| ordinal_prefix(&label, "year")) {
        return Some(n);
    }
    if let Ok(n) = label.parse::<i64>() {
        return Some(n);
    }
    match label.as_str() {
        "fy" => Some(1),
        "sy" => Some(2),
        "ty" => Some(3),
        "final" | "final year" => Some(99),
        _ => None,
    }
}

/// Leading number of patterns like "2nd sem" / "3 year" when `unit` follows.
fn ordinal_prefix(label: &str, unit: &str) -> Option<i64> {
    let idx = label.find(unit)?;
    let head = label[..idx].trim_end();
    let head = head
        .trim_end_matches("st")
        .trim_end_matches("nd")
        .trim_end_matches("rd")
        .trim_end_matches("th");
    let digits: String = head.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<i64>().ok()
}

#[derive(Debug, Clone, Default)]
pub struct SubjectMarks {
    pub name: String,
    pub max_marks: i64,
    pub obtained_marks: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExamSummary {
    pub total_max_marks: i64,
    pub total_obtained_marks: i64,
    pub percentage: f64,
    pub grade: &'static str,
    pub overall_status: &'static str,
}

/// Aggregate per-subject marks. A subject counts iff its name is non-empty;
/// the percentage is rounded to two decimals before grading so the stored
/// percentage, grade and pass flag always agree.
pub fn score_exam(subjects: &[SubjectMarks]) -> ExamSummary {
    let mut total_max: i64 = 0;
    let mut total_obtained: i64 = 0;
    for s in subjects {
        if s.name.trim().is_empty() {
            continue;
        }
        total_max += s.max_marks;
        total_obtained += s.obtained_marks;
    }

    let percentage = if total_max > 0 {
        round2(100.0 * total_obtained as f64 / total_max as f64)
    } else {
        0.0
    };

    ExamSummary {
        total_max_marks: total_max,
        total_obtained_marks: total_obtained,
        percentage,
        grade: grade(percentage),
        overall_status: if passes(percentage) { "Pass" } else { "Fail" },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subj(name: &str, max: i64, obtained: i64) -> SubjectMarks {
        SubjectMarks {
            name: name.to_string(),
            max_marks: max,
            obtained_marks: obtained,
        }
    }

    #[test]
    fn grade_table_boundaries() {
        assert_eq!(grade(100.0), "A+");
        assert_eq!(grade(90.0), "A+");
        assert_eq!(grade(89.99), "A");
        assert_eq!(grade(80.0), "A");
        assert_eq!(grade(70.0), "B+");
        assert_eq!(grade(60.0), "B");
        assert_eq!(grade(50.0), "C+");
        assert_eq!(grade(40.0), "C");
        assert_eq!(grade(39.99), "F");
        assert_eq!(grade(0.0), "F");
    }

    #[test]
    fn pass_threshold_is_inclusive() {
        assert!(passes(40.0));
        assert!(!passes(39.99));
    }

    #[test]
    fn total_fee_sums_all_ten_components() {
        let c = FeeComponents {
            total_course_fees: 16500.0,
            enrollment_fee: 500.0,
            eligibility_certificate_fee: 100.0,
            university_affiliation_fee: 200.0,
            university_sports_fee: 50.0,
            university_development_fee: 150.0,
            tc_cc_fee: 25.0,
            miscellaneous_fee_1: 10.0,
            miscellaneous_fee_2: 20.0,
            miscellaneous_fee_3: 30.0,
        };
        assert_eq!(total_fee(&c), 17585.0);
        assert_eq!(total_fee(&FeeComponents::default()), 0.0);
    }

    #[test]
    fn rebate_only_subtracted_when_granted() {
        assert_eq!(after_rebate(16500.0, 2000.0, false), 16500.0);
        assert_eq!(after_rebate(16500.0, 2000.0, true), 14500.0);
        assert_eq!(amount_due(14500.0, 5000.0), 9500.0);
    }

    #[test]
    fn payment_status_transitions() {
        assert_eq!(payment_status(0.0, 0.0, 0.0), PaymentStatus::Pending);
        assert_eq!(
            payment_status(16500.0, 0.0, 16500.0),
            PaymentStatus::Pending
        );
        assert_eq!(
            payment_status(16500.0, 5000.0, 11500.0),
            PaymentStatus::Partial
        );
        assert_eq!(payment_status(16500.0, 16500.0, 0.0), PaymentStatus::Paid);
        // Overpaid: due goes negative and still reads Paid.
        assert_eq!(
            payment_status(16500.0, 17000.0, -500.0),
            PaymentStatus::Paid
        );
    }

    #[test]
    fn scholarship_booleans_stay_monotone() {
        for st in [
            ScholarshipStatus::NotApplied,
            ScholarshipStatus::Applied,
            ScholarshipStatus::Approved,
            ScholarshipStatus::Rejected,
            ScholarshipStatus::Granted,
        ] {
            if st.granted() {
                assert!(st.approved());
            }
            if st.approved() {
                assert!(st.applied());
            }
            assert_eq!(ScholarshipStatus::parse(st.as_str()), Some(st));
        }
        assert_eq!(ScholarshipStatus::parse("granted"), None);
    }

    #[test]
    fn address_joins_non_empty_parts() {
        assert_eq!(
            concatenate_address(
                Some("12 Main Rd"),
                Some(""),
                Some("Raniwara"),
                Some("Rajasthan")
            ),
            "12 Main Rd, Raniwara, Rajasthan"
        );
        assert_eq!(concatenate_address(None, None, None, None), "");
        assert_eq!(
            concatenate_address(None, Some(" Dhora "), None, None),
            "Dhora"
        );
    }

    #[test]
    fn year_semester_labels_parse_to_ordinals() {
        assert_eq!(year_semester_order("1st Year"), Some(1));
        assert_eq!(year_semester_order("2nd year"), Some(2));
        assert_eq!(year_semester_order("3rd Sem"), Some(3));
        assert_eq!(year_semester_order("4th sem"), Some(4));
        assert_eq!(year_semester_order("2"), Some(2));
        assert_eq!(year_semester_order("FY"), Some(1));
        assert_eq!(year_semester_order("TY"), Some(3));
        assert_eq!(year_semester_order("Final Year"), Some(99));
        assert_eq!(year_semester_order("monsoon"), None);
        assert_eq!(year_semester_order(""), None);
    }

    #[test]
    fn exam_scoring_three_subjects() {
        let summary = score_exam(&[
            subj("A", 100, 85),
            subj("B", 100, 72),
            subj("C", 100, 40),
        ]);
        assert_eq!(summary.total_max_marks, 300);
        assert_eq!(summary.total_obtained_marks, 197);
        assert_eq!(summary.percentage, 65.67);
        assert_eq!(summary.grade, "B");
        assert_eq!(summary.overall_status, "Pass");
    }

    #[test]
    fn exam_scoring_failing_and_empty() {
        let summary = score_exam(&[subj("A", 100, 20), subj("B", 100, 30), subj("", 100, 99)]);
        assert_eq!(summary.total_max_marks, 200);
        assert_eq!(summary.percentage, 25.0);
        assert_eq!(summary.grade, "F");
        assert_eq!(summary.overall_status, "Fail");

        let empty = score_exam(&[]);
        assert_eq!(empty.total_max_marks, 0);
        assert_eq!(empty.percentage, 0.0);
        assert_eq!(empty.overall_status, "Fail");
    }
}
