//! Fuel bounds how much work an evaluation may do.

#[derive(Debug, Clone)]
pub struct Fuel {
    fuel: u64,
    spent: u64,
}

impl Fuel {
    pub fn with(fuel: u64) -> Self {
        Self { fuel, spent: 0 }
    }

    /// Subtract from the remaining fuel. Consuming more than what is left
    /// empties the tank.
    pub fn consume(&mut self, fuel: u64) {
        let burnt = fuel.min(self.fuel);
        self.fuel -= burnt;
        self.spent = self.spent.saturating_add(burnt);
    }

    /// Total fuel consumed so far.
    pub fn spent(&self) -> u64 {
        self.spent
    }

    /// Returns true if there is fuel left to take another step.
    pub fn should_continue(&self) -> bool {
        self.fuel > 0
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::Fuel;

    #[test]
    fn consumption() {
        let mut fuel = Fuel::with(3);
        check!(fuel.should_continue());
        fuel.consume(2);
        check!(fuel.should_continue());
        check!(fuel.spent() == 2);
        fuel.consume(5);
        check!(fuel.spent() == 3);
        check!(!fuel.should_continue());
        check!(!Fuel::with(0).should_continue());
    }
}
