//! Tuition billing domain module.
//!
//! This crate contains the business rules for monthly tuition (discount
//! aggregation, invoice generation, payment settlement and the approval
//! workflow that gates class enrollment), the portal login gates and the cash
//! book. Everything here is deterministic domain logic (no IO, no HTTP, no
//! storage); callers pass `now`.

pub mod approval;
pub mod cashbook;
pub mod discount;
pub mod generation;
pub mod guardian;
pub mod invoice;
pub mod login;
pub mod membership;
pub mod payment;
pub mod period;
pub mod registry;

pub use approval::{decide, ApprovalOutcome, EnrollmentChange};
pub use cashbook::{
    enrollment_fee_total, CashEntry, CashEntryFilter, CashEntryInput, CashSummary, EntryCategory,
    EntryKind,
};
pub use discount::{aggregate_discount, Discount, NewDiscount};
pub use generation::{plan_invoice_batch, GenerateInvoices};
pub use guardian::{match_guardian, same_name, Guardian};
pub use invoice::{
    ApprovalDecision, ApprovalStatus, Invoice, InvoiceKey, PaymentStatus, TuitionAmounts,
};
pub use login::{admit_student, check_credentials, normalize_access_code};
pub use membership::ClassMembership;
pub use payment::{settle, total_paid, Payment, PaymentMethod, RecordPayment};
pub use period::Period;
pub use registry::{
    next_access_code, phone_digits, ClassCohort, FinancialPlan, Student, StudentStatus,
};
