use rand::Rng;

use super::state::Role;

/// The two live credentials gating admission, regenerated each time a
/// classroom opens and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCodes {
    pub teacher_code: String,
    pub student_code: String,
}

impl AccessCodes {
    pub fn generate() -> Self {
        let teacher_code = Self::generate_code();
        let mut student_code = Self::generate_code();
        while student_code == teacher_code {
            student_code = Self::generate_code();
        }
        Self {
            teacher_code,
            student_code,
        }
    }

    /// Generate a random 6-digit code
    fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        format!("{:06}", rng.gen_range(100000..999999))
    }
}

/// Validates an inbound connection's credential and assigns a role.
///
/// Rejection is silent at the protocol level: the connecting peer simply
/// never receives acceptance and infers failure by timeout.
pub struct RoleAdmission {
    codes: AccessCodes,
}

impl RoleAdmission {
    pub fn new(codes: AccessCodes) -> Self {
        Self { codes }
    }

    pub fn codes(&self) -> &AccessCodes {
        &self.codes
    }

    /// First-come-wins for the singleton teacher role; students are
    /// unbounded; anything else is rejected.
    pub fn evaluate(&self, passcode: &str, teacher_connected: bool) -> Option<Role> {
        if passcode == self.codes.teacher_code {
            if teacher_connected {
                tracing::info!("Rejecting duplicate teacher admission");
                return None;
            }
            Some(Role::Teacher)
        } else if passcode == self.codes.student_code {
            Some(Role::Student)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_six_digits_and_distinct() {
        let codes = AccessCodes::generate();
        assert_eq!(codes.teacher_code.len(), 6);
        assert_eq!(codes.student_code.len(), 6);
        assert_ne!(codes.teacher_code, codes.student_code);
        assert!(codes.teacher_code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_teacher_code_first_come_wins() {
        let admission = RoleAdmission::new(AccessCodes {
            teacher_code: "123456".to_string(),
            student_code: "654321".to_string(),
        });

        assert_eq!(admission.evaluate("123456", false), Some(Role::Teacher));
        assert_eq!(admission.evaluate("123456", true), None);
    }

    #[test]
    fn test_student_code_always_admits() {
        let admission = RoleAdmission::new(AccessCodes {
            teacher_code: "123456".to_string(),
            student_code: "654321".to_string(),
        });

        assert_eq!(admission.evaluate("654321", false), Some(Role::Student));
        assert_eq!(admission.evaluate("654321", true), Some(Role::Student));
    }

    #[test]
    fn test_unknown_code_rejected() {
        let admission = RoleAdmission::new(AccessCodes {
            teacher_code: "123456".to_string(),
            student_code: "654321".to_string(),
        });

        assert_eq!(admission.evaluate("000000", false), None);
        assert_eq!(admission.evaluate("", false), None);
    }
}
