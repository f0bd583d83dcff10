//! Regulation dartboard geometry, millimetres.

pub const RADIUS_INNER_BULL_MM: f64 = 6.35;
pub const RADIUS_OUTER_BULL_MM: f64 = 15.9;
pub const RADIUS_INNER_TRIPLE_MM: f64 = 99.0;
pub const RADIUS_OUTER_TRIPLE_MM: f64 = 107.0;
pub const RADIUS_INNER_DOUBLE_MM: f64 = 162.0;
pub const RADIUS_OUTER_DOUBLE_MM: f64 = 170.0;
pub const RADIUS_BOARD_MM: f64 = 225.5;

/// Sector values starting at the top ("20") and proceeding clockwise.
pub const FIELDS: [u8; 20] = [
    20, 1, 18, 4, 13, 6, 10, 15, 2, 17, 3, 19, 7, 16, 8, 11, 14, 9, 12, 5,
];

/// Angular width of one sector, radians.
pub const SECTOR_ANGLE: f64 = 2.0 * std::f64::consts::PI / 20.0;
