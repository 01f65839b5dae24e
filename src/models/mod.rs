pub mod columns;
pub mod cpf;
pub mod margin;
pub mod page_data;
pub mod pensioner;

pub use columns::{field_for_header, is_no_margin, record_from_fields, records_from_table, MarginField};
pub use cpf::{normalize, Cpf};
pub use margin::{MarginRecord, Outcome, OutcomeKind, WorkItem, WorkKey};
pub use page_data::{LabeledField, TableSnapshot};
pub use pensioner::PensionerOption;
