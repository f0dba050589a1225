use heck::ToUpperCamelCase;
use std::collections::HashSet;

/// Allocates unique, target-friendly unit names for one session.
#[derive(Default)]
pub struct Names {
    defined: HashSet<String>,
    tmp: usize,
}

impl Names {
    /// Camel-cases `base` and disambiguates it against every name handed out
    /// so far.
    pub fn unit(&mut self, base: &str) -> String {
        let mut base = base.to_upper_camel_case();
        if base.is_empty() {
            base = "Unit".to_string();
        }
        let mut name = base.clone();
        while self.defined.contains(&name) {
            name = format!("{base}{}", self.tmp);
            self.tmp += 1;
        }
        self.defined.insert(name.clone());
        name
    }
}
