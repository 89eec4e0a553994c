mod support;

mod counter_tests;
