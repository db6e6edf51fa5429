//! Material catalog and bill-of-materials templates.
//!
//! The inventory core only reads the catalog: designs to resolve material
//! requirements and reference prices to cost an order.

pub mod bom;
pub mod design;
pub mod material;
pub mod reader;

pub use bom::{BillOfMaterialsResolver, LineDelta, MaterialRequirement};
pub use design::{Complexity, Design, DesignMaterialLine, MaterialSelection};
pub use material::{MaterialColor, MaterialReference, MaterialType};
pub use reader::CatalogReader;
