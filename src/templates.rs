use std::sync::OnceLock;
use tera::Tera;

static TERA: OnceLock<Tera> = OnceLock::new();

pub const COMMISSION_SUBMITTED: &str = "commission_submitted.txt";
pub const COMMISSION_STATUS_UPDATED: &str = "commission_status_updated.txt";

/// Mail templates are compiled into the binary.
pub fn get_tera() -> &'static Tera {
    TERA.get_or_init(|| {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (
                COMMISSION_SUBMITTED,
                include_str!("../templates/mail/commission_submitted.txt"),
            ),
            (
                COMMISSION_STATUS_UPDATED,
                include_str!("../templates/mail/commission_status_updated.txt"),
            ),
        ])
        .expect("Failed to load templates");
        tera
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_templates_are_registered() {
        let names: Vec<&str> = get_tera().get_template_names().collect();
        assert!(names.contains(&COMMISSION_SUBMITTED));
        assert!(names.contains(&COMMISSION_STATUS_UPDATED));
    }
}
