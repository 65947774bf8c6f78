mod bot_info;
mod calculate;
mod earthquake;

pub use bot_info::BotInfoTool;
pub use calculate::CalculateTool;
pub use earthquake::{EarthquakeSearchTool, DEFAULT_EARTHQUAKE_API_BASE};
