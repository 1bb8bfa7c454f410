//! Conformance suite shared by every graphrt backend.
//!
//! A backend's integration tests invoke [`define_backend_tests!`] with a
//! constructor returning `Option<Arc<dyn Backend>>`; returning `None` skips
//! the suite (for backends whose toolchain or device is missing).

pub use graphrt;

pub mod harness;
pub mod ops;
pub mod parity;
pub mod smoke;

#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        mod $module {
            #[allow(unused_imports)]
            use super::*;

            use $crate::{parity, smoke};

            macro_rules! backend_test {
                ($name:ident, $func:path) => {
                    #[test]
                    fn $name() {
                        $crate::harness::init_tracing();
                        let backend: Option<::std::sync::Arc<dyn $crate::graphrt::Backend>> =
                            ($backend_ctor)();
                        let Some(backend) = backend else {
                            return;
                        };
                        $func(&backend);
                    }
                };
            }

            backend_test!(smoke_add_matches_expected, smoke::add_matches_expected);
            backend_test!(smoke_abc_custom_op_matches_expected, smoke::abc_custom_op_matches_expected);
            backend_test!(smoke_unsupported_custom_op_reports_dispatch_miss, smoke::unsupported_custom_op_reports_dispatch_miss);
            backend_test!(smoke_compile_is_idempotent, smoke::compile_is_idempotent);
            backend_test!(smoke_call_frame_is_reusable, smoke::call_frame_is_reusable);
            backend_test!(smoke_remove_compiled_function_recompiles, smoke::remove_compiled_function_recompiles);
            backend_test!(smoke_performance_data_must_precede_compile, smoke::performance_data_must_precede_compile);
            backend_test!(smoke_performance_data_counts_calls, smoke::performance_data_counts_calls);
            backend_test!(smoke_zero_element_tensors_are_accepted, smoke::zero_element_tensors_are_accepted);
            backend_test!(smoke_zero_element_nodes_report_no_counters, smoke::zero_element_nodes_report_no_counters);
            backend_test!(smoke_multi_output_custom_op, smoke::multi_output_custom_op);
            backend_test!(smoke_results_may_alias_inputs_and_constants, smoke::results_may_alias_inputs_and_constants);
            backend_test!(smoke_integer_arithmetic_wraps, smoke::integer_arithmetic_wraps);
            backend_test!(smoke_convert_follows_numeric_conventions, smoke::convert_follows_numeric_conventions);
            backend_test!(smoke_dot_matches_expected, smoke::dot_matches_expected);
            backend_test!(smoke_writes_into_external_buffers, smoke::writes_into_external_buffers);
            backend_test!(smoke_mismatched_tensors_are_rejected, smoke::mismatched_tensors_are_rejected);

            backend_test!(parity_float_elementwise_chain, parity::float_elementwise_chain);
            backend_test!(parity_positive_domain_ops, parity::positive_domain_ops);
            backend_test!(parity_integer_elementwise_chain, parity::integer_elementwise_chain);
            backend_test!(parity_conversions, parity::conversions);
            backend_test!(parity_matrix_products, parity::matrix_products);
        }
    };
}
