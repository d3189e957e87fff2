pub mod receipts;

pub use receipts::{
    ListReceiptsParams, ReceiptListResponse, ReceiptResponse, ReviewReceiptRequest,
    SubmitReceiptRequest,
};
