//! Role/module edit gate. Mirrors the per-module allow-lists enforced on
//! every write path; read access is not gated here.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Admin,
    Students,
    Courses,
    Fees,
    Exams,
}

impl Module {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "students" => Some(Self::Students),
            "courses" => Some(Self::Courses),
            "fees" => Some(Self::Fees),
            "exams" => Some(Self::Exams),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Students => "students",
            Self::Courses => "courses",
            Self::Fees => "fees",
            Self::Exams => "exams",
        }
    }

    fn allowed_roles(self) -> &'static [&'static str] {
        match self {
            Self::Admin => &["Administrator"],
            Self::Students | Self::Courses => &["Administrator", "Manager", "Admission Officer"],
            Self::Fees => &["Administrator", "Manager", "Accountant"],
            Self::Exams => &["Administrator", "Exam Controller"],
        }
    }
}

/// True iff the role is on the module's allow-list and holds Edit access.
/// Administrator is on every list but still needs `access_type = Edit`.
pub fn can_edit(role_name: &str, access_type: &str, module: Module) -> bool {
    access_type == "Edit" && module.allowed_roles().contains(&role_name)
}

/// The five canonical roles seeded by `admin.seedRoles`.
pub const SEED_ROLES: &[(&str, &str, i64)] = &[
    ("Administrator", "Full access to every module", 1),
    ("Manager", "Students, courses and fees", 2),
    ("Admission Officer", "Student and course records", 3),
    ("Accountant", "Fee collection and invoices", 3),
    ("Exam Controller", "Exam results and promotion", 3),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_edits_everything() {
        for m in [
            Module::Admin,
            Module::Students,
            Module::Courses,
            Module::Fees,
            Module::Exams,
        ] {
            assert!(can_edit("Administrator", "Edit", m));
            assert!(!can_edit("Administrator", "Read", m));
        }
    }

    #[test]
    fn module_allow_lists() {
        assert!(can_edit("Accountant", "Edit", Module::Fees));
        assert!(!can_edit("Accountant", "Edit", Module::Students));
        assert!(can_edit("Admission Officer", "Edit", Module::Students));
        assert!(can_edit("Admission Officer", "Edit", Module::Courses));
        assert!(!can_edit("Admission Officer", "Edit", Module::Fees));
        assert!(can_edit("Manager", "Edit", Module::Fees));
        assert!(!can_edit("Manager", "Edit", Module::Admin));
        assert!(can_edit("Exam Controller", "Edit", Module::Exams));
        assert!(!can_edit("Exam Controller", "Edit", Module::Courses));
    }

    #[test]
    fn unknown_module_string_rejected() {
        assert_eq!(Module::parse("payroll"), None);
        assert_eq!(Module::parse("fees"), Some(Module::Fees));
    }
}
