/// One of the two white shades.
///
/// The collector keeps one of them as the "current" white. At the end of
/// every atomic phase the meaning flips: survivors were marked during the
/// cycle, and whatever still carries the old shade is garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhiteShade {
    A,
    B,
}

impl WhiteShade {
    /// lgc.h: otherwhite(g)
    #[inline(always)]
    pub fn other(self) -> Self {
        match self {
            WhiteShade::A => WhiteShade::B,
            WhiteShade::B => WhiteShade::A,
        }
    }
}

/// Tri-color mark state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcColor {
    /// Not yet proven reachable in this cycle
    White(WhiteShade),
    /// Reachable, outgoing references not traversed yet
    Gray,
    /// Reachable and fully traversed
    Black,
}

/// Per-object collector metadata
#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    color: GcColor,
    /// FINALIZEDBIT: object sits in `finobj` or `tobefnz`
    finalize: bool,
    /// Bytes charged to the debt counters for this object
    size: u32,
}

impl GcHeader {
    /// New objects are born with the current white (luaC_newobj).
    #[inline(always)]
    pub fn with_white(current_white: WhiteShade, size: u32) -> Self {
        GcHeader {
            color: GcColor::White(current_white),
            finalize: false,
            size,
        }
    }

    #[inline(always)]
    pub fn color(&self) -> GcColor {
        self.color
    }

    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline(always)]
    pub(crate) fn set_size(&mut self, size: u32) {
        self.size = size;
    }

    // ============ Color Queries ============

    #[inline(always)]
    pub fn is_white(&self) -> bool {
        matches!(self.color, GcColor::White(_))
    }

    #[inline(always)]
    pub fn is_black(&self) -> bool {
        self.color == GcColor::Black
    }

    /// Neither white nor black
    #[inline(always)]
    pub fn is_gray(&self) -> bool {
        self.color == GcColor::Gray
    }

    /// An object is dead when it still carries the shade that stopped being
    /// current at the last flip. Only meaningful between the atomic phase and
    /// the moment the sweep reaches the object.
    #[inline(always)]
    pub fn is_dead(&self, current_white: WhiteShade) -> bool {
        self.color == GcColor::White(current_white.other())
    }

    // ============ Color Transitions ============

    #[inline(always)]
    pub fn make_white(&mut self, current_white: WhiteShade) {
        self.color = GcColor::White(current_white);
    }

    #[inline(always)]
    pub fn make_gray(&mut self) {
        self.color = GcColor::Gray;
    }

    #[inline(always)]
    pub fn make_black(&mut self) {
        self.color = GcColor::Black;
    }

    /// lgc.h: changewhite(x). Used to resurrect a dead interned string.
    #[inline(always)]
    pub fn change_white(&mut self) {
        if let GcColor::White(shade) = self.color {
            self.color = GcColor::White(shade.other());
        }
    }

    // ============ Finalization Flag ============

    #[inline(always)]
    pub fn to_finalize(&self) -> bool {
        self.finalize
    }

    #[inline(always)]
    pub(crate) fn set_finalize(&mut self, finalize: bool) {
        self.finalize = finalize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_predicates_are_exclusive() {
        let mut header = GcHeader::with_white(WhiteShade::A, 24);
        assert!(header.is_white() && !header.is_gray() && !header.is_black());

        header.make_gray();
        assert!(!header.is_white() && header.is_gray() && !header.is_black());

        header.make_black();
        assert!(!header.is_white() && !header.is_gray() && header.is_black());
    }

    #[test]
    fn test_dead_only_with_other_white() {
        let header = GcHeader::with_white(WhiteShade::A, 24);
        assert!(!header.is_dead(WhiteShade::A));
        assert!(header.is_dead(WhiteShade::B));

        let mut black = header;
        black.make_black();
        assert!(!black.is_dead(WhiteShade::A));
        assert!(!black.is_dead(WhiteShade::B));
    }

    #[test]
    fn test_change_white_resurrects() {
        let mut header = GcHeader::with_white(WhiteShade::A, 24);
        // after a flip the current white is B, so this object looks dead
        assert!(header.is_dead(WhiteShade::B));
        header.change_white();
        assert!(!header.is_dead(WhiteShade::B));
        assert_eq!(header.color(), GcColor::White(WhiteShade::B));

        // gray and black objects are untouched
        header.make_gray();
        header.change_white();
        assert!(header.is_gray());
    }

    #[test]
    fn test_finalize_flag_independent_of_color() {
        let mut header = GcHeader::with_white(WhiteShade::B, 8);
        header.set_finalize(true);
        header.make_black();
        assert!(header.to_finalize());
        header.make_white(WhiteShade::A);
        assert!(header.to_finalize());
        header.set_finalize(false);
        assert!(!header.to_finalize());
    }
}
