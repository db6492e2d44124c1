use crate::region::RegionId;

/// A walkable span of a [`CompactHeightfield`](crate::CompactHeightfield), linked to up to four neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// The floor of the span, in voxels above the heightfield's base.
    pub y: u16,
    /// The region the span belongs to, or [`RegionId::NONE`].
    pub region: RegionId,
    /// The free space above the floor in voxels, saturated at 255.
    pub height: u8,
    /// Six bits per direction, see [`CompactSpan::con`].
    connections: u32,
}

impl Default for CompactSpan {
    fn default() -> Self {
        Self {
            y: 0,
            region: RegionId::NONE,
            height: 0,
            connections: 0x00ff_ffff,
        }
    }
}

impl CompactSpan {
    /// Connection value marking a direction without a neighbor.
    pub const NOT_CONNECTED: u8 = 0x3f;

    const BITS_PER_DIRECTION: u32 = 6;

    /// A span at floor `y` with `height` voxels of free space, no region and no neighbors.
    #[inline]
    pub fn new(y: u16, height: u8) -> Self {
        Self {
            y,
            height,
            ..Default::default()
        }
    }

    /// Links the span to the neighbor at layer `neighbor` of the adjacent column in `direction`,
    /// or unlinks it if `neighbor` is `None`.
    #[inline]
    pub fn set_con(&mut self, direction: u8, neighbor: impl Into<Option<u8>>) {
        let shift = direction as u32 * Self::BITS_PER_DIRECTION;
        let mask = (Self::NOT_CONNECTED as u32) << shift;
        let layer = neighbor.into().unwrap_or(Self::NOT_CONNECTED) & Self::NOT_CONNECTED;
        self.connections = (self.connections & !mask) | ((layer as u32) << shift);
    }

    /// The layer index of the neighbor inside the adjacent column in `direction`,
    /// or `None` if there is no walkable neighbor there.
    #[inline]
    pub fn con(&self, direction: u8) -> Option<u8> {
        let shift = direction as u32 * Self::BITS_PER_DIRECTION;
        let layer = (self.connections >> shift) as u8 & Self::NOT_CONNECTED;
        (layer != Self::NOT_CONNECTED).then_some(layer)
    }
}
