// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

pub(crate) mod plural {
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    pub(crate) fn suites_str(count: usize) -> &'static str {
        if count == 1 { "suite" } else { "suites" }
    }
}

#[cfg(test)]
mod tests {
    use super::plural;

    #[test]
    fn plural_forms() {
        assert_eq!(plural::tests_str(1), "test");
        assert_eq!(plural::tests_str(0), "tests");
        assert_eq!(plural::suites_str(1), "suite");
        assert_eq!(plural::suites_str(2), "suites");
    }
}
