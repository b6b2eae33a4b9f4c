//! Slot planning for tensors with known execution-order windows.

/// One tensor to place: its usage window `[start, end]` and element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanRequest {
    pub start: usize,
    pub end: usize,
    pub size: usize,
    /// Exclusive requests always get a slot of their own.
    pub exclusive: bool,
}

#[derive(Debug, Clone)]
struct SlotState {
    end: usize,
    capacity: usize,
    exclusive: bool,
}

/// Result of planning: which slot backs each request, and slot capacities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPlan {
    slot_of: Vec<usize>,
    capacities: Vec<usize>,
}

impl MemoryPlan {
    /// Places every request into a slot.
    ///
    /// With `optimize` set, a request reuses a slot whose previous occupant's
    /// window ended strictly before the request starts. Among free slots the
    /// smallest one that is large enough wins; otherwise the largest free slot
    /// grows to fit.
    pub fn plan(requests: &[PlanRequest], optimize: bool) -> Self {
        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by_key(|&i| (requests[i].start, requests[i].end, i));

        let mut slots: Vec<SlotState> = Vec::new();
        let mut slot_of = vec![0; requests.len()];

        for idx in order {
            let req = requests[idx];
            debug_assert!(req.start <= req.end);

            let reuse = if optimize && !req.exclusive {
                Self::pick_slot(&slots, &req)
            } else {
                None
            };

            let slot = match reuse {
                Some(slot) => {
                    let state = &mut slots[slot];
                    state.end = req.end;
                    state.capacity = state.capacity.max(req.size);
                    slot
                }
                None => {
                    slots.push(SlotState {
                        end: req.end,
                        capacity: req.size,
                        exclusive: req.exclusive,
                    });
                    slots.len() - 1
                }
            };
            slot_of[idx] = slot;
        }

        Self {
            slot_of,
            capacities: slots.into_iter().map(|s| s.capacity).collect(),
        }
    }

    fn pick_slot(slots: &[SlotState], req: &PlanRequest) -> Option<usize> {
        let free = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.exclusive && s.end < req.start);

        let mut best_fit: Option<(usize, usize)> = None;
        let mut largest: Option<(usize, usize)> = None;
        for (i, s) in free {
            if s.capacity >= req.size && best_fit.is_none_or(|(_, cap)| s.capacity < cap) {
                best_fit = Some((i, s.capacity));
            }
            if largest.is_none_or(|(_, cap)| s.capacity > cap) {
                largest = Some((i, s.capacity));
            }
        }
        best_fit.or(largest).map(|(i, _)| i)
    }

    /// Slot assigned to the i-th request.
    pub fn slot(&self, request: usize) -> usize {
        self.slot_of[request]
    }

    pub fn num_slots(&self) -> usize {
        self.capacities.len()
    }

    /// Sum of slot capacities, in elements.
    pub fn total_elements(&self) -> usize {
        self.capacities.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(start: usize, end: usize, size: usize) -> PlanRequest {
        PlanRequest {
            start,
            end,
            size,
            exclusive: false,
        }
    }

    #[test]
    fn test_disjoint_windows_share_slot() {
        let plan = MemoryPlan::plan(&[req(0, 1, 8), req(2, 3, 8)], true);
        assert_eq!(plan.num_slots(), 1);
        assert_eq!(plan.slot(0), plan.slot(1));
        assert_eq!(plan.total_elements(), 8);
    }

    #[test]
    fn test_overlapping_windows_do_not_share() {
        let plan = MemoryPlan::plan(&[req(0, 2, 8), req(2, 3, 8)], true);
        assert_eq!(plan.num_slots(), 2);
        assert_ne!(plan.slot(0), plan.slot(1));
    }

    #[test]
    fn test_no_optimization_gives_one_slot_each() {
        let plan = MemoryPlan::plan(&[req(0, 0, 4), req(1, 1, 4), req(2, 2, 4)], false);
        assert_eq!(plan.num_slots(), 3);
        assert_eq!(plan.total_elements(), 12);
    }

    #[test]
    fn test_exclusive_never_reused() {
        let exclusive = PlanRequest {
            exclusive: true,
            ..req(0, 0, 4)
        };
        let plan = MemoryPlan::plan(&[exclusive, req(1, 1, 4)], true);
        assert_eq!(plan.num_slots(), 2);
    }

    #[test]
    fn test_reused_slot_grows_to_largest() {
        let plan = MemoryPlan::plan(&[req(0, 0, 4), req(1, 1, 10)], true);
        assert_eq!(plan.num_slots(), 1);
        assert_eq!(plan.total_elements(), 10);
    }

    #[test]
    fn test_best_fit_prefers_smallest_sufficient_slot() {
        let plan = MemoryPlan::plan(&[req(0, 0, 16), req(0, 0, 4), req(1, 1, 4)], true);
        assert_eq!(plan.slot(2), plan.slot(1));
        assert_eq!(plan.total_elements(), 20);
    }
}
