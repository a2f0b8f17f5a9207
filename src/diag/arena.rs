use anyhow::Result;

/// Diagnostic kinds that own a region of the flat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagKind {
    Dist5D,
    Dist6D,
    Orbit,
    TransportCoef,
}

impl DiagKind {
    pub fn name(self) -> &'static str {
        match self {
            DiagKind::Dist5D => "dist5d",
            DiagKind::Dist6D => "dist6d",
            DiagKind::Orbit => "orbit",
            DiagKind::TransportCoef => "transcoef",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub kind: DiagKind,
    pub offset: usize,
    pub len: usize,
}

/// One flat buffer holding every enabled diagnostic, each in its own region.
/// The layout is fixed when the arena is allocated.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagArena {
    regions: Vec<Region>,
    data: Vec<f64>,
}

impl DiagArena {
    /// Allocates zeroed storage for the given regions, in order.
    pub fn allocate(layout: &[(DiagKind, usize)]) -> Result<Self> {
        let mut regions = Vec::with_capacity(layout.len());
        let mut total: usize = 0;
        for &(kind, len) in layout {
            if regions.iter().any(|r: &Region| r.kind == kind) {
                anyhow::bail!("diagnostic region '{}' requested twice", kind.name());
            }
            regions.push(Region { kind, offset: total, len });
            total = total
                .checked_add(len)
                .ok_or_else(|| anyhow::anyhow!("diagnostic buffer size overflows usize"))?;
        }

        let mut data = Vec::new();
        data.try_reserve_exact(total).map_err(|e| {
            anyhow::anyhow!("Failed to allocate {} diagnostic values ({} MB): {}", total, total * 8 / 1_048_576, e)
        })?;
        data.resize(total, 0.0);
        Ok(DiagArena { regions, data })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    fn find(&self, kind: DiagKind) -> Option<Region> {
        self.regions.iter().copied().find(|r| r.kind == kind)
    }

    pub fn region(&self, kind: DiagKind) -> Option<&[f64]> {
        let r = self.find(kind)?;
        Some(&self.data[r.offset..r.offset + r.len])
    }

    pub fn region_mut(&mut self, kind: DiagKind) -> Option<&mut [f64]> {
        let r = self.find(kind)?;
        Some(&mut self.data[r.offset..r.offset + r.len])
    }
}
