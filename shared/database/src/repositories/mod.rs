//! Repository module for database CRUD operations
//! 
//! Typed repositories for suppliers, products, prices, price history and uploads.
//! All queries are runtime SQL so no DATABASE_URL is needed at compile time.

pub mod supplier;
pub mod product;
pub mod price;
pub mod upload;

pub use supplier::SupplierRepository;
pub use product::ProductRepository;
pub use price::PriceRepository;
pub use upload::UploadRepository;
